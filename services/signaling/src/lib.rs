pub mod config;
pub mod delivery;
pub mod directory;
pub mod events;
pub mod hub;
pub mod live;
pub mod session;
pub mod signal;
pub mod state;
pub mod watchdog;
pub mod ws_signaling;

pub use state::AppState;

use axum::{Router, routing::get};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/signaling", get(ws_signaling::ws_signaling_handler))
        .route("/ws/v1/delivery", get(delivery::ws_delivery_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
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
