use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{config::WEBHOOK_PATH, state::AppState};

pub mod health;
pub mod webhook;

pub fn create_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook::receive))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
