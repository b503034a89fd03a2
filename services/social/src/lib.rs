pub mod cache;
pub mod cdc;
pub mod config;
pub mod consumer;
pub mod http;
pub mod reconciler;
pub mod repo;

pub use http::SocialState;

use axum::{
    Router,
    routing::{get, post},
};

pub fn build_router(state: SocialState) -> Router {
    Router::new()
        .route(
            "/api/v1/users/{user_id}/followers/count",
            get(http::get_followers_count),
        )
        .route(
            "/api/v1/users/{user_id}/following/status",
            post(http::post_following_status),
        )
        .route(
            "/api/v1/users/{user_id}/follow",
            post(http::post_follow).delete(http::delete_follow),
        )
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
