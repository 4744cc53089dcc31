//! Database access for the queue table.
//!
//! - `items`: item listing, counts, delete and requeue.
//! - `queues`: per-queue summaries and bulk clears.
//!
//! The table itself belongs to the queueing library; nothing here creates or
//! migrates it.

pub mod items;
pub mod queues;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

pub use items::ItemRepository;
pub use queues::QueueRepository;

pub type Pool = SqlitePool;

/// SQLite primary result code for "unable to open database file".
const SQLITE_CANTOPEN: i32 = 14;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot reach storage: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let unreachable = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => true,
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| code & 0xff == SQLITE_CANTOPEN),
            _ => false,
        };
        if unreachable {
            StorageError::Unavailable(err)
        } else {
            StorageError::Query(err)
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Build a pool without opening a connection; failures surface on first use.
pub fn init_pool(database_url: &str, acquire_timeout: Duration) -> StorageResult<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePoolOptions::new()
        .acquire_timeout(acquire_timeout)
        .connect_lazy(&normalized)?;
    Ok(pool)
}

/// Round-trip a trivial statement to prove the database is reachable.
#[instrument(skip_all)]
pub async fn ping(pool: &Pool) -> StorageResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Expand a leading `~/` in a file-backed SQLite URL. In-memory and non-sqlite
/// URLs pass through untouched. The database file is never created here.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    let Some(home_relative) = path_part.strip_prefix("~/") else {
        return url.to_string();
    };
    let Ok(home) = std::env::var("HOME") else {
        return url.to_string();
    };

    let mut rebuilt = format!("sqlite://{}/{}", home.trim_end_matches('/'), home_relative);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}
