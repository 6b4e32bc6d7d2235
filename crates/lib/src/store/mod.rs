//! Datastore seam: the hosted relational store (PostgREST over HTTP) or an in-memory
//! stand-in with the same contract.
//!
//! Rows travel as JSON objects; typed views live in [`records`]. Aggregations that the
//! hosted store computes server-side are reached through [`Datastore::rpc`].

mod memory;
mod postgrest;
pub mod records;

pub use memory::MemoryStore;
pub use postgrest::PostgrestClient;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const TABLE_CONVERSATIONS: &str = "conversations";
pub const TABLE_MESSAGES: &str = "messages";
pub const TABLE_WAITLIST_USERS: &str = "waitlist_users";
pub const TABLE_EVENTS: &str = "events";
pub const TABLE_USERS: &str = "users";
pub const TABLE_SESSIONS: &str = "sessions";

pub const RPC_COUNT_DISTINCT_USERS: &str = "count_distinct_users";
pub const RPC_SUM_TOKENS: &str = "sum_tokens";
pub const RPC_SUM_COST: &str = "sum_cost";
pub const RPC_TOP_AGENTS: &str = "top_agents";
pub const RPC_TOP_REFERRERS: &str = "top_referrers";
pub const RPC_COUNT_RETURNING_USERS: &str = "count_returning_users";
pub const RPC_COHORT_RETENTION: &str = "cohort_retention";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("datastore request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("datastore api error: {0}")]
    Api(String),
    #[error("duplicate key on {table}.{column}")]
    Conflict { table: String, column: String },
    #[error("unknown rpc: {0}")]
    UnknownRpc(String),
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Row filter. Column names may be JSON paths such as `meta->>latency_ms`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Column is greater than or equal to an RFC 3339 timestamp.
    Gte(String, String),
    NotNull(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Read request against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Comma-separated column list; `None` selects everything.
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.into(), values));
        self
    }

    pub fn gte(mut self, column: impl Into<String>, timestamp: impl Into<String>) -> Self {
        self.filters.push(Filter::Gte(column.into(), timestamp.into()));
        self
    }

    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.filters.push(Filter::NotNull(column.into()));
        self
    }

    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Operations the service needs from the relational store.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;

    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Exact row count matching the query filters (columns, order and limit are ignored).
    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Insert one row; returns the stored row including generated columns.
    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    /// Insert, or merge into the existing row with the same `on_conflict` value.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value, StoreError>;

    /// Merge `patch` into every row matching the query filters.
    async fn update(&self, query: &Query, patch: Value) -> Result<(), StoreError>;

    /// Call a named stored procedure.
    async fn rpc(&self, name: &str, args: Value) -> Result<Value, StoreError>;
}

/// Timestamp text written to the store. Fixed width, so string order is time order.
pub fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// First row of a select, if any.
pub async fn select_one(store: &dyn Datastore, query: Query) -> Result<Option<Value>, StoreError> {
    let rows = store.select(&query.limit(1)).await?;
    Ok(rows.into_iter().next())
}

/// Resolve a column or JSON path (`meta->>latency_ms`, `meta->agent`) against a row.
pub fn lookup_path<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for segment in path.split("->") {
        let key = segment.trim_start_matches('>');
        current = current.get(key)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Numeric view of a count or RPC result. Null, missing and non-numeric values are 0.
pub fn value_as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Non-negative integer view of a count or RPC result.
pub fn value_as_u64(v: &Value) -> u64 {
    if let Some(n) = v.as_u64() {
        return n;
    }
    let f = value_as_f64(v);
    if f.is_finite() && f > 0.0 {
        f as u64
    } else {
        0
    }
}

/// Array view of an RPC result; anything else is empty.
pub fn value_as_rows(v: Value) -> Vec<Value> {
    match v {
        Value::Array(rows) => rows,
        _ => Vec::new(),
    }
}
