//! HTTP API mounted under `/api/v1`.

mod health;
mod items;
mod queues;

use crate::config::Config;
use crate::db::{ItemRepository, Pool, QueueRepository, StorageError};
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared handler state. Repositories are cheap clones over one pool.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub items: ItemRepository,
    pub queues: QueueRepository,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool, config: Config) -> Result<Self> {
        let table = config.table()?;
        Ok(Self {
            items: ItemRepository::new(pool.clone(), table.clone()),
            queues: QueueRepository::new(pool.clone(), table),
            pool,
            config: Arc::new(config),
        })
    }
}

/// Storage failures rendered as JSON.
#[derive(Debug)]
pub struct ApiError(StorageError);

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = if self.0.is_unavailable() {
            warn!(err = %self.0, "storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Unable to connect to database. Your configuration may be incorrect".to_string(),
            )
        } else {
            error!(err = %self.0, "storage error");
            (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/items", get(items::list_items))
        .route("/items/:id", delete(items::delete_item))
        .route("/items/:id/requeue", post(items::requeue_item))
        .route("/queues", get(queues::list_queues))
        .route("/queues/:name/delete-queued", post(queues::delete_queued))
        .route("/queues/:name/delete-processed", post(queues::delete_processed))
        .route("/health/check", get(health::check))
        .route("/health/config", get(health::config));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "starting pq-dashboard");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
