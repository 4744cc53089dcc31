use super::{Pool, StorageResult};
use crate::model::{ItemCounts, ItemState, QueueSummary};
use crate::query::TableName;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Per-queue aggregates and bulk clears.
#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool,
    table: TableName,
}

impl QueueRepository {
    pub fn new(pool: Pool, table: TableName) -> Self {
        Self { pool, table }
    }

    /// One summary per queue name present in the table, ordered by name.
    /// Queues without rows do not appear.
    #[instrument(skip_all)]
    pub async fn queue_summaries(&self) -> StorageResult<Vec<QueueSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT q_name, (dequeued_at IS NOT NULL) AS processed, COUNT(*) AS n FROM {} GROUP BY q_name, processed",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut by_name: BTreeMap<String, ItemCounts> = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get("q_name")?;
            let processed: i64 = row.try_get("processed")?;
            let n: i64 = row.try_get("n")?;
            let state = if processed != 0 {
                ItemState::Processed
            } else {
                ItemState::Queued
            };
            by_name.entry(name).or_default().add(state, n);
        }

        Ok(by_name
            .into_iter()
            .map(|(name, counts)| QueueSummary::new(name, counts))
            .collect())
    }

    /// Remove every queued row of `queue_name`. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn delete_queued(&self, queue_name: &str) -> StorageResult<u64> {
        self.delete_partition(queue_name, ItemState::Queued).await
    }

    /// Remove every processed row of `queue_name`. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn delete_processed(&self, queue_name: &str) -> StorageResult<u64> {
        self.delete_partition(queue_name, ItemState::Processed).await
    }

    async fn delete_partition(&self, queue_name: &str, state: ItemState) -> StorageResult<u64> {
        let partition = match state {
            ItemState::Queued => "dequeued_at IS NULL",
            ItemState::Processed => "dequeued_at IS NOT NULL",
        };
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE q_name = ? AND {partition}",
            self.table
        ))
        .bind(queue_name)
        .execute(&self.pool)
        .await?;
        let removed = result.rows_affected();
        info!(queue = queue_name, state = state.as_str(), removed, "cleared partition");
        Ok(removed)
    }
}
