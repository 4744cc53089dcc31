//! Statement composition for reads over the queue table.
//!
//! Every filter value and pagination bound travels as a positional parameter.
//! The only text spliced into SQL is the table name, which is validated by
//! [`TableName::new`], and column/direction keywords chosen from fixed enums.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;
use std::fmt;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Columns selected for an item listing. `data_type` carries the storage class
/// of `data` so the payload can be classified without guessing.
const ITEM_COLUMNS: &str =
    "id, enqueued_at, dequeued_at, expected_at, schedule_at, q_name, data, typeof(data) AS data_type";

const LIKE_ESCAPE: char = '\\';

/// Name of the physical queue table, restricted to a plain SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: &str) -> Option<Self> {
        IDENTIFIER.is_match(name).then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self("queue".to_string())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    EnqueuedAt,
    DequeuedAt,
    ExpectedAt,
    ScheduledAt,
    Queue,
}

impl SortField {
    const ALL: [SortField; 5] = [
        SortField::EnqueuedAt,
        SortField::DequeuedAt,
        SortField::ExpectedAt,
        SortField::ScheduledAt,
        SortField::Queue,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            SortField::EnqueuedAt => "enqueued_at",
            SortField::DequeuedAt => "dequeued_at",
            SortField::ExpectedAt => "expected_at",
            SortField::ScheduledAt => "schedule_at",
            SortField::Queue => "q_name",
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            SortField::EnqueuedAt => "enqueuedAt",
            SortField::DequeuedAt => "dequeuedAt",
            SortField::ExpectedAt => "expectedAt",
            SortField::ScheduledAt => "scheduledAt",
            SortField::Queue => "queue",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Whitelisted ordering. Free text never reaches the statement: a token is
/// either mapped onto one of these pairs or replaced by the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderBy {
    pub field: SortField,
    pub direction: Direction,
}

impl OrderBy {
    /// Parse a `{field}_{ASC|DESC}` token such as `enqueuedAt_DESC`.
    pub fn from_token(token: &str) -> Option<Self> {
        let (field, direction) = token.rsplit_once('_')?;
        let field = SortField::ALL.into_iter().find(|f| f.token() == field)?;
        let direction = match direction {
            "ASC" => Direction::Asc,
            "DESC" => Direction::Desc,
            _ => return None,
        };
        Some(Self { field, direction })
    }

    /// Unknown or missing tokens fall back to `enqueuedAt_ASC`.
    pub fn normalize(token: Option<&str>) -> Self {
        token.and_then(Self::from_token).unwrap_or_default()
    }

    pub fn token(&self) -> String {
        format!("{}_{}", self.field.token(), self.direction.keyword())
    }

    fn clause(&self) -> String {
        let dir = self.direction.keyword();
        format!(" ORDER BY {} {dir}, id {dir}", self.field.column())
    }
}

/// Optional filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub queue_name: Option<String>,
    pub exclude_processed: bool,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 25,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// A statement plus the positional values for its `?` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        self.params
            .iter()
            .fold(sqlx::query::<Sqlite>(&self.sql), |query, param| match param {
                SqlParam::Text(value) => query.bind(value.as_str()),
                SqlParam::Int(value) => query.bind(*value),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    QueueName(String),
    Queued,
    /// Substring match on the serialized payload. SQLite `LIKE` folds case
    /// for ASCII letters only, so `É` does not match `é`.
    Search(String),
}

impl Predicate {
    fn template(&self) -> &'static str {
        match self {
            Predicate::QueueName(_) => "q_name = ?",
            Predicate::Queued => "dequeued_at IS NULL",
            Predicate::Search(_) => "CAST(data AS TEXT) LIKE ? ESCAPE '\\'",
        }
    }

    fn into_param(self) -> Option<SqlParam> {
        match self {
            Predicate::QueueName(name) => Some(SqlParam::Text(name)),
            Predicate::Queued => None,
            Predicate::Search(term) => Some(SqlParam::Text(contains_pattern(&term))),
        }
    }
}

fn predicates(filter: &ItemFilter) -> Vec<Predicate> {
    let mut out = Vec::new();
    if let Some(name) = &filter.queue_name {
        out.push(Predicate::QueueName(name.clone()));
    }
    if filter.exclude_processed {
        out.push(Predicate::Queued);
    }
    if let Some(term) = &filter.search {
        out.push(Predicate::Search(term.clone()));
    }
    out
}

fn where_clause(predicates: Vec<Predicate>) -> (String, Vec<SqlParam>) {
    if predicates.is_empty() {
        return (String::new(), Vec::new());
    }
    let clauses: Vec<&str> = predicates.iter().map(Predicate::template).collect();
    let sql = format!(" WHERE {}", clauses.join(" AND "));
    let params = predicates
        .into_iter()
        .filter_map(Predicate::into_param)
        .collect();
    (sql, params)
}

/// Escape LIKE metacharacters so the term matches literally.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Substring pattern for `term`, metacharacters escaped.
pub fn contains_pattern(term: &str) -> String {
    format!("%{}%", escape_like(term))
}

/// Paginated, ordered item listing.
pub fn select_items(
    table: &TableName,
    filter: &ItemFilter,
    order: OrderBy,
    page: Pagination,
) -> Statement {
    let (filter_sql, mut params) = where_clause(predicates(filter));
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM {table}{filter_sql}{} LIMIT ? OFFSET ?",
        order.clause()
    );
    params.push(SqlParam::Int(i64::from(page.limit)));
    params.push(SqlParam::Int(i64::from(page.offset)));
    Statement { sql, params }
}

/// Counts per partition over the same predicates as [`select_items`], without
/// pagination. Yields rows of `(processed, n)`.
pub fn count_items(table: &TableName, filter: &ItemFilter) -> Statement {
    let (filter_sql, params) = where_clause(predicates(filter));
    let sql = format!(
        "SELECT (dequeued_at IS NOT NULL) AS processed, COUNT(*) AS n FROM {table}{filter_sql} GROUP BY processed"
    );
    Statement { sql, params }
}

pub fn select_item(table: &TableName) -> String {
    format!("SELECT {ITEM_COLUMNS} FROM {table} WHERE id = ?")
}
