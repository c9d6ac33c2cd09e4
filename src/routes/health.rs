use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::{
    error::AppResult,
    jobs::QUEUE_NOTIFICATIONS,
    state::AppState,
};

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let dead = state.queue.dead_jobs(100).await?;
    let dead_notifications = dead
        .iter()
        .filter(|job| job.queue == QUEUE_NOTIFICATIONS)
        .count();
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "dead_jobs": dead.len(),
            "dead_notifications": dead_notifications,
        })),
    ))
}
