use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Partition of an item, derived solely from whether `dequeued_at` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Queued,
    Processed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Queued => "queued",
            ItemState::Processed => "processed",
        }
    }

    pub fn of(dequeued_at: Option<&DateTime<Utc>>) -> Self {
        if dequeued_at.is_some() {
            ItemState::Processed
        } else {
            ItemState::Queued
        }
    }
}

/// One row of the queue table with its payload already decoded for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub enqueued_at: DateTime<Utc>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub expected_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub q_name: String,
    pub data: Value,
}

impl Item {
    pub fn state(&self) -> ItemState {
        ItemState::of(self.dequeued_at.as_ref())
    }
}

/// A page of items plus the size of the whole filtered set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemPage {
    pub records: Vec<Item>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

/// Item counts per partition for a filtered view of the table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemCounts {
    pub queued: i64,
    pub processed: i64,
    pub total: i64,
}

impl ItemCounts {
    pub fn add(&mut self, state: ItemState, count: i64) {
        match state {
            ItemState::Queued => self.queued += count,
            ItemState::Processed => self.processed += count,
        }
        self.total = self.queued + self.processed;
    }
}

/// Per-queue aggregate, computed on every request and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSummary {
    pub name: String,
    pub queued: i64,
    pub processed: i64,
    pub total: i64,
}

impl QueueSummary {
    pub fn new(name: impl Into<String>, counts: ItemCounts) -> Self {
        Self {
            name: name.into(),
            queued: counts.queued,
            processed: counts.processed,
            total: counts.total,
        }
    }
}
