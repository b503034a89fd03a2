pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod pool;

pub use dispatcher::Dispatcher;
pub use pool::{DeliverError, DeliveryPool, PoolConfig};

use axum::{Router, routing::get};

/// Status surface: the dispatcher has no API of its own, but every service
/// answers the standard probes.
pub fn build_router() -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
