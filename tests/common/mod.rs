//! Fixture table and write path standing in for the queueing library.
//!
//! Mirrors `db::test_support` in `src/db/mod.rs`, which is not visible to
//! integration tests. Change both schemas together.
#![allow(dead_code)]

use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

const SCHEMA: &str = r#"
    CREATE TABLE queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        enqueued_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        dequeued_at TEXT,
        expected_at TEXT,
        schedule_at TEXT,
        q_name TEXT NOT NULL,
        data JSON NOT NULL
    )
"#;

pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query(SCHEMA).execute(&pool).await.unwrap();
    pool
}

pub async fn put(pool: &SqlitePool, q_name: &str, data: Value) -> i64 {
    sqlx::query_scalar("INSERT INTO queue (q_name, data) VALUES (?, ?) RETURNING id")
        .bind(q_name)
        .bind(data.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Consume the oldest queued item of `q_name`, like a worker would.
pub async fn take(pool: &SqlitePool, q_name: &str) -> Option<i64> {
    sqlx::query_scalar(
        "UPDATE queue SET dequeued_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = (SELECT id FROM queue WHERE q_name = ? AND dequeued_at IS NULL ORDER BY id LIMIT 1)
         RETURNING id",
    )
    .bind(q_name)
    .fetch_optional(pool)
    .await
    .unwrap()
}
