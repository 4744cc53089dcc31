use super::{ApiResult, AppState};
use crate::model::QueueSummary;
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

/// Summaries for every queue present in the table.
pub async fn list_queues(State(state): State<AppState>) -> ApiResult<Json<Vec<QueueSummary>>> {
    Ok(Json(state.queues.queue_summaries().await?))
}

/// Drop every queued item of a queue.
pub async fn delete_queued(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = state.queues.delete_queued(&name).await?;
    Ok(Json(json!({ "removed": removed })))
}

/// Drop every processed item of a queue.
pub async fn delete_processed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = state.queues.delete_processed(&name).await?;
    Ok(Json(json!({ "removed": removed })))
}
