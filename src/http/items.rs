use super::{ApiResult, AppState};
use crate::model::ItemPage;
use crate::query::{ItemFilter, OrderBy, Pagination};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub queue: Option<String>,
    pub exclude_processed: Option<bool>,
    pub search: Option<String>,
    pub order_by: Option<String>,
}

impl ListQuery {
    /// Split into repository inputs. Empty strings count as absent and the
    /// limit is clamped to the configured maximum.
    fn into_parts(self, default_limit: u32, max_limit: u32) -> (ItemFilter, Pagination, OrderBy) {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        let filter = ItemFilter {
            queue_name: non_empty(self.queue),
            exclude_processed: self.exclude_processed.unwrap_or(false),
            search: non_empty(self.search),
        };
        let page = Pagination {
            limit: self.limit.unwrap_or(default_limit).min(max_limit),
            offset: self.offset.unwrap_or(0),
        };
        (filter, page, OrderBy::normalize(self.order_by.as_deref()))
    }
}

/// List items matching the query parameters.
pub async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Json<ItemPage>> {
    let dashboard = &state.config.dashboard;
    let (filter, page, order) =
        params.into_parts(dashboard.default_page_size, dashboard.max_page_size);
    let items = state.items.list_items(&filter, page, order).await?;
    Ok(Json(items))
}

/// Delete one item. Missing ids succeed.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let deleted = state.items.delete_item(id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// Enqueue a copy of an item.
pub async fn requeue_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let requeued = state.items.requeue_item(id).await?;
    Ok(Json(json!({ "id": requeued })))
}
