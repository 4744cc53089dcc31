use super::{ApiResult, AppState};
use crate::config::PublicConfig;
use crate::db;
use axum::{extract::State, Json};
use serde_json::{json, Value};

pub async fn check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    db::ping(&state.pool).await?;
    Ok(Json(json!({ "still": "alive" })))
}

pub async fn config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json(state.config.public_view())
}
