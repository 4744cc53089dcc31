use super::{Pool, StorageResult};
use crate::model::{Item, ItemCounts, ItemPage, ItemState};
use crate::payload::{self, LegacyDecoder, Payload, PickleDecoder};
use crate::query::{self, ItemFilter, OrderBy, Pagination, TableName};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Item-level reads and mutations over the queue table.
#[derive(Clone)]
pub struct ItemRepository {
    pool: Pool,
    table: TableName,
    legacy: Arc<dyn LegacyDecoder>,
}

impl ItemRepository {
    pub fn new(pool: Pool, table: TableName) -> Self {
        Self::with_decoder(pool, table, Arc::new(PickleDecoder))
    }

    pub fn with_decoder(pool: Pool, table: TableName, legacy: Arc<dyn LegacyDecoder>) -> Self {
        Self {
            pool,
            table,
            legacy,
        }
    }

    /// One page of items plus the count of the whole filtered set.
    #[instrument(skip_all, fields(order = %order.token(), limit = page.limit, offset = page.offset))]
    pub async fn list_items(
        &self,
        filter: &ItemFilter,
        page: Pagination,
        order: OrderBy,
    ) -> StorageResult<ItemPage> {
        let stmt = query::select_items(&self.table, filter, order, page);
        let rows = stmt.query().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(|row| self.item_from_row(row))
            .collect::<Result<Vec<_>, _>>()?;

        let counts = self.item_counts(filter).await?;
        debug!(returned = records.len(), total = counts.total, "listed items");

        Ok(ItemPage {
            records,
            total: counts.total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// Queued/processed/total counts for the filtered set, ignoring pagination.
    #[instrument(skip_all)]
    pub async fn item_counts(&self, filter: &ItemFilter) -> StorageResult<ItemCounts> {
        let stmt = query::count_items(&self.table, filter);
        let rows = stmt.query().fetch_all(&self.pool).await?;
        let mut counts = ItemCounts::default();
        for row in rows {
            let processed: i64 = row.try_get("processed")?;
            let n: i64 = row.try_get("n")?;
            let state = if processed != 0 {
                ItemState::Processed
            } else {
                ItemState::Queued
            };
            counts.add(state, n);
        }
        Ok(counts)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, id: i64) -> StorageResult<Option<Item>> {
        let row = sqlx::query(&query::select_item(&self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.item_from_row(&row)).transpose()
    }

    /// Delete one row by id. Returns whether a row was removed; a missing id is
    /// not an error.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        info!(id, deleted, "delete item");
        Ok(deleted)
    }

    /// Insert a fresh queued copy of an item, leaving the source row as is.
    /// Returns the new id, or `None` when `id` does not exist.
    #[instrument(skip(self))]
    pub async fn requeue_item(&self, id: i64) -> StorageResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;
        let source = sqlx::query(&format!(
            "SELECT q_name, data, typeof(data) AS data_type FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(source) = source else {
            info!(id, "requeue skipped, item not found");
            return Ok(None);
        };

        let q_name: String = source.try_get("q_name")?;
        let data = payload::reencode(payload_from_row(&source)?, self.legacy.as_ref());
        let new_id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {} (q_name, data) VALUES (?, ?) RETURNING id",
            self.table
        ))
        .bind(&q_name)
        .bind(data.to_string())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(id, new_id, q_name = %q_name, "requeued item");
        Ok(Some(new_id))
    }

    fn item_from_row(&self, row: &SqliteRow) -> StorageResult<Item> {
        let data = payload::decode(payload_from_row(row)?, self.legacy.as_ref());
        Ok(Item {
            id: row.try_get("id")?,
            enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
            dequeued_at: row.try_get("dequeued_at")?,
            expected_at: row.try_get("expected_at")?,
            scheduled_at: row.try_get("schedule_at")?,
            q_name: row.try_get("q_name")?,
            data,
        })
    }
}

/// Classify `data` by the storage class reported in `data_type`.
fn payload_from_row(row: &SqliteRow) -> StorageResult<Payload> {
    let data_type: String = row.try_get("data_type")?;
    let payload = match data_type.as_str() {
        "blob" => Payload::Binary(row.try_get("data")?),
        "text" => Payload::from_text(row.try_get("data")?),
        "integer" => Payload::Structured(row.try_get::<i64, _>("data")?.into()),
        "real" => Payload::Structured(row.try_get::<f64, _>("data")?.into()),
        _ => Payload::Structured(serde_json::Value::Null),
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{put, put_blob, put_raw_text, row_count, setup_pool, take};
    use crate::payload::UNKNOWN_BINARY;
    use serde_json::json;

    fn repo(pool: &Pool) -> ItemRepository {
        ItemRepository::new(pool.clone(), TableName::default())
    }

    fn page(limit: u32, offset: u32) -> Pagination {
        Pagination { limit, offset }
    }

    #[tokio::test]
    async fn lists_all_items_with_total() {
        let pool = setup_pool().await;
        for n in 1..=3 {
            put(&pool, "one", json!(format!("item {n}"))).await;
        }
        let items = repo(&pool);

        let page = items
            .list_items(&ItemFilter::default(), page(10, 0), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.limit, 10);
        assert_eq!(page.offset, 0);
        let data: Vec<_> = page.records.iter().map(|i| i.data.clone()).collect();
        assert_eq!(data, vec![json!("item 1"), json!("item 2"), json!("item 3")]);
    }

    #[tokio::test]
    async fn total_ignores_pagination() {
        let pool = setup_pool().await;
        for n in 0..5 {
            put(&pool, "one", json!({ "n": n })).await;
        }
        let page = repo(&pool)
            .list_items(&ItemFilter::default(), page(2, 2), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.records[0].data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn filters_combine_with_and() {
        let pool = setup_pool().await;
        put(&pool, "one", json!({"task": "apples"})).await;
        put(&pool, "one", json!({"task": "oranges"})).await;
        put(&pool, "one", json!({"task": "oranges again"})).await;
        put(&pool, "two", json!({"task": "oranges"})).await;
        take(&pool, "one").await;
        take(&pool, "one").await;

        let filter = ItemFilter {
            queue_name: Some("one".into()),
            exclude_processed: true,
            search: Some("ORANGES".into()),
        };
        let page = repo(&pool)
            .list_items(&filter, page(10, 0), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records.len(), 1);
        let item = &page.records[0];
        assert_eq!(item.q_name, "one");
        assert_eq!(item.state(), ItemState::Queued);
        assert_eq!(item.data, json!({"task": "oranges again"}));
    }

    #[tokio::test]
    async fn exclude_processed_never_returns_processed_rows() {
        let pool = setup_pool().await;
        for n in 0..4 {
            put(&pool, "one", json!(n)).await;
        }
        take(&pool, "one").await;
        let filter = ItemFilter {
            exclude_processed: true,
            ..Default::default()
        };
        let page = repo(&pool)
            .list_items(&filter, page(10, 0), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.records.iter().all(|i| i.dequeued_at.is_none()));
    }

    #[tokio::test]
    async fn search_metacharacters_match_literally() {
        let pool = setup_pool().await;
        put(&pool, "one", json!("50% off")).await;
        put(&pool, "one", json!("500 off")).await;
        put(&pool, "one", json!("a_b")).await;
        put(&pool, "one", json!("axb")).await;
        let items = repo(&pool);

        let search = |term: &str| ItemFilter {
            search: Some(term.into()),
            ..Default::default()
        };
        let pct = items
            .list_items(&search("0%"), page(10, 0), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(pct.total, 1);
        assert_eq!(pct.records[0].data, json!("50% off"));

        let underscore = items
            .list_items(&search("a_b"), page(10, 0), OrderBy::default())
            .await
            .unwrap();
        assert_eq!(underscore.total, 1);
        assert_eq!(underscore.records[0].data, json!("a_b"));
    }

    #[tokio::test]
    async fn search_folds_ascii_case_only() {
        let pool = setup_pool().await;
        put(&pool, "one", json!("Hello World")).await;
        put(&pool, "one", json!("Émile")).await;
        let items = repo(&pool);

        let total = |term: &'static str| {
            let items = items.clone();
            async move {
                let filter = ItemFilter {
                    search: Some(term.into()),
                    ..Default::default()
                };
                items
                    .list_items(&filter, page(10, 0), OrderBy::default())
                    .await
                    .unwrap()
                    .total
            }
        };
        assert_eq!(total("hello world").await, 1);
        assert_eq!(total("Émile").await, 1);
        assert_eq!(total("émile").await, 0);
    }

    #[tokio::test]
    async fn unknown_order_matches_default_order() {
        let pool = setup_pool().await;
        for q in ["c", "a", "b"] {
            put(&pool, q, json!(q)).await;
        }
        let items = repo(&pool);
        let ids = |page: ItemPage| page.records.into_iter().map(|i| i.id).collect::<Vec<_>>();

        let default = ids(items
            .list_items(&ItemFilter::default(), page(10, 0), OrderBy::normalize(None))
            .await
            .unwrap());
        let bogus = ids(items
            .list_items(
                &ItemFilter::default(),
                page(10, 0),
                OrderBy::normalize(Some("id; DROP TABLE queue")),
            )
            .await
            .unwrap());
        let by_queue = items
            .list_items(
                &ItemFilter::default(),
                page(10, 0),
                OrderBy::normalize(Some("queue_DESC")),
            )
            .await
            .unwrap();

        assert_eq!(default, bogus);
        let mut sorted = default.clone();
        sorted.sort();
        assert_eq!(default, sorted);
        let names: Vec<_> = by_queue.records.iter().map(|i| i.q_name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn mixed_payload_encodings_never_fail_the_listing() {
        let pool = setup_pool().await;
        let pickle = serde_pickle::to_vec(&vec![1, 2, 3], serde_pickle::SerOptions::new()).unwrap();
        let latin1: String = pickle.iter().map(|&b| char::from(b)).collect();

        put(&pool, "one", json!({"task": "x"})).await;
        put(&pool, "one", serde_json::Value::String(latin1)).await;
        put_blob(&pool, "one", &pickle).await;
        put_blob(&pool, "one", &[0x80, 0x05, 0xde, 0xad]).await;
        put_raw_text(&pool, "one", "not json at all").await;

        let page = repo(&pool)
            .list_items(&ItemFilter::default(), page(10, 0), OrderBy::default())
            .await
            .unwrap();
        let data: Vec<_> = page.records.into_iter().map(|i| i.data).collect();
        assert_eq!(
            data,
            vec![
                json!({"task": "x"}),
                json!([1, 2, 3]),
                json!([1, 2, 3]),
                json!(UNKNOWN_BINARY),
                json!("not json at all"),
            ]
        );
    }

    #[tokio::test]
    async fn delete_is_exact_and_idempotent() {
        let pool = setup_pool().await;
        let keep = put(&pool, "one", json!("keep")).await;
        let gone = put(&pool, "one", json!("gone")).await;
        let items = repo(&pool);

        assert!(items.delete_item(gone).await.unwrap());
        assert_eq!(row_count(&pool).await, 1);
        assert!(items.get_item(keep).await.unwrap().is_some());
        assert!(items.get_item(gone).await.unwrap().is_none());

        assert!(!items.delete_item(gone).await.unwrap());
        assert!(!items.delete_item(9_999).await.unwrap());
        assert_eq!(row_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn requeue_adds_a_queued_copy() {
        let pool = setup_pool().await;
        let id = put(&pool, "one", json!({"task": "x"})).await;
        let items = repo(&pool);
        let queued = |pool: Pool| async move {
            ItemRepository::new(pool, TableName::default())
                .item_counts(&ItemFilter {
                    queue_name: Some("one".into()),
                    ..Default::default()
                })
                .await
                .unwrap()
                .queued
        };
        assert_eq!(queued(pool.clone()).await, 1);

        let new_id = items.requeue_item(id).await.unwrap().unwrap();
        assert_ne!(new_id, id);
        assert_eq!(queued(pool.clone()).await, 2);

        let original = items.get_item(id).await.unwrap().unwrap();
        let copy = items.get_item(new_id).await.unwrap().unwrap();
        assert_eq!(original.data, json!({"task": "x"}));
        assert_eq!(copy.data, json!({"task": "x"}));
        assert_eq!(copy.q_name, "one");
        assert!(copy.dequeued_at.is_none());
    }

    #[tokio::test]
    async fn requeue_of_processed_item_leaves_original_processed() {
        let pool = setup_pool().await;
        let id = put(&pool, "one", json!("job")).await;
        take(&pool, "one").await;
        let items = repo(&pool);

        items.requeue_item(id).await.unwrap().unwrap();
        let counts = items.item_counts(&ItemFilter::default()).await.unwrap();
        assert_eq!(
            counts,
            ItemCounts {
                queued: 1,
                processed: 1,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn requeue_of_missing_id_inserts_nothing() {
        let pool = setup_pool().await;
        put(&pool, "one", json!("job")).await;
        assert_eq!(repo(&pool).requeue_item(42).await.unwrap(), None);
        assert_eq!(row_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn requeue_keeps_pickle_text_encoding() {
        let pool = setup_pool().await;
        let pickle = serde_pickle::to_vec(&"payload", serde_pickle::SerOptions::new()).unwrap();
        let latin1: String = pickle.iter().map(|&b| char::from(b)).collect();
        let id = put(&pool, "one/pickle", serde_json::Value::String(latin1.clone())).await;
        let items = repo(&pool);

        let new_id = items.requeue_item(id).await.unwrap().unwrap();
        let stored: String = sqlx::query_scalar("SELECT data FROM queue WHERE id = ?")
            .bind(new_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, serde_json::Value::String(latin1).to_string());
        let copy = items.get_item(new_id).await.unwrap().unwrap();
        assert_eq!(copy.data, json!("payload"));
    }
}
