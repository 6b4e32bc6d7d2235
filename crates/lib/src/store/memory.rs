//! In-memory datastore for development and tests.
//!
//! Tables are JSON row lists behind a tokio `RwLock`. Unique keys, generated ids and
//! timestamps follow the hosted schema, and every stored procedure the metrics
//! aggregator calls has a reference implementation here.

use crate::store::{
    lookup_path, timestamp, value_as_f64, Datastore, Filter, Query, StoreError, RPC_COHORT_RETENTION,
    RPC_COUNT_DISTINCT_USERS, RPC_COUNT_RETURNING_USERS, RPC_SUM_COST, RPC_SUM_TOKENS,
    RPC_TOP_AGENTS, RPC_TOP_REFERRERS, TABLE_CONVERSATIONS, TABLE_EVENTS, TABLE_USERS,
    TABLE_WAITLIST_USERS,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// (table, column) pairs with a unique constraint.
const UNIQUE_KEYS: [(&str, &str); 3] = [
    (TABLE_CONVERSATIONS, "phone"),
    (TABLE_WAITLIST_USERS, "phone"),
    (TABLE_USERS, "phone_hash"),
];

const TOP_N: usize = 10;

type Tables = HashMap<String, Vec<Value>>;

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn value_ts(v: Option<&Value>) -> Option<DateTime<Utc>> {
    v.and_then(|v| v.as_str()).and_then(parse_ts)
}

/// Text form used for loose equality (PostgREST compares filter operands as text).
fn literal(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || literal(a) == literal(b)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (value_ts(Some(a)), value_ts(Some(b))) {
                return x.cmp(&y);
            }
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.total_cmp(&y);
            }
            literal(a).cmp(&literal(b))
        }
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(col, v) => lookup_path(row, col).is_some_and(|x| loosely_equal(x, v)),
        Filter::In(col, values) => {
            lookup_path(row, col).is_some_and(|x| values.iter().any(|v| loosely_equal(x, v)))
        }
        Filter::Gte(col, ts) => {
            let cell = lookup_path(row, col);
            match (value_ts(cell), parse_ts(ts)) {
                (Some(x), Some(y)) => x >= y,
                _ => cell.is_some_and(|x| literal(x).as_str() >= ts.as_str()),
            }
        }
        Filter::NotNull(col) => lookup_path(row, col).is_some(),
    }
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(row, f))
}

fn project(row: &Value, columns: Option<&str>) -> Value {
    let Some(cols) = columns.map(str::trim).filter(|c| !c.is_empty() && *c != "*") else {
        return row.clone();
    };
    let mut out = Map::new();
    for col in cols.split(',').map(str::trim) {
        if let Some(v) = row.get(col) {
            out.insert(col.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(t), Some(p)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in p {
            t.insert(k.clone(), v.clone());
        }
    }
}

fn unique_column(table: &str) -> Option<&'static str> {
    UNIQUE_KEYS
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, c)| *c)
}

/// Fill generated columns (`id`, `created_at`, and `ts` for events).
fn with_defaults(table: &str, row: Value, now: DateTime<Utc>) -> Result<Value, StoreError> {
    let Value::Object(mut obj) = row else {
        return Err(StoreError::Api(format!("insert into {}: row must be an object", table)));
    };
    obj.entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    obj.entry("created_at")
        .or_insert_with(|| Value::String(timestamp(now)));
    if table == TABLE_EVENTS {
        obj.entry("ts").or_insert_with(|| Value::String(timestamp(now)));
    }
    Ok(Value::Object(obj))
}

/// In-memory implementation of [`Datastore`].
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Number of rows currently stored in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, Vec::len)
    }

    fn insert_locked(tables: &mut Tables, table: &str, row: Value) -> Result<Value, StoreError> {
        let row = with_defaults(table, row, Utc::now())?;
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(col) = unique_column(table) {
            if let Some(key) = row.get(col).filter(|v| !v.is_null()) {
                if rows.iter().any(|r| r.get(col) == Some(key)) {
                    return Err(StoreError::Conflict {
                        table: table.to_string(),
                        column: col.to_string(),
                    });
                }
            }
        }
        rows.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&query.table) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<&Value> = rows
            .iter()
            .filter(|r| matches_all(r, &query.filters))
            .collect();
        if let Some(ref order) = query.order {
            hits.sort_by(|a, b| {
                let o = compare(lookup_path(a, &order.column), lookup_path(b, &order.column));
                if order.descending {
                    o.reverse()
                } else {
                    o
                }
            });
        } else {
            // Without an explicit order rows come back newest first, like an append log read.
            hits.reverse();
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|r| project(r, query.columns.as_deref()))
            .collect())
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&query.table).map_or(0, |rows| {
            rows.iter()
                .filter(|r| matches_all(r, &query.filters))
                .count() as u64
        }))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let mut tables = self.tables.write().await;
        Self::insert_locked(&mut tables, table, row)
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value, StoreError> {
        let mut tables = self.tables.write().await;
        let key = row.get(on_conflict).cloned().filter(|v| !v.is_null());
        if let Some(key) = key {
            if let Some(existing) = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| r.get(on_conflict) == Some(&key)))
            {
                merge(existing, &row);
                return Ok(existing.clone());
            }
        }
        Self::insert_locked(&mut tables, table, row)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| matches_all(r, &query.filters)) {
                merge(row, &patch);
            }
        }
        Ok(())
    }

    async fn rpc(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        let tables = self.tables.read().await;
        let empty = Vec::new();
        let events = tables.get(TABLE_EVENTS).unwrap_or(&empty);
        let users = tables.get(TABLE_USERS).unwrap_or(&empty);
        let since = since_arg(&args)?;
        match name {
            RPC_COUNT_DISTINCT_USERS => Ok(json!(count_distinct_users(events, since))),
            RPC_SUM_TOKENS => Ok(json!(sum_meta(events, since, "tokens"))),
            RPC_SUM_COST => Ok(json!(sum_meta(events, since, "cost_usd"))),
            RPC_TOP_AGENTS => Ok(top_by_meta(events, since, "agent", "agent")),
            RPC_TOP_REFERRERS => Ok(top_by_meta(events, since, "referrer_id", "referrer_id")),
            RPC_COUNT_RETURNING_USERS => Ok(json!(count_returning_users(events, since))),
            RPC_COHORT_RETENTION => Ok(cohort_retention(events, users, since)),
            other => Err(StoreError::UnknownRpc(other.to_string())),
        }
    }
}

/// Optional `since` argument of a procedure call.
fn since_arg(args: &Value) -> Result<Option<DateTime<Utc>>, StoreError> {
    match args.get("since") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_ts(s)
            .map(Some)
            .ok_or_else(|| StoreError::Api(format!("invalid since timestamp: {}", s))),
        Some(other) => Err(StoreError::Api(format!("invalid since argument: {}", other))),
    }
}

fn event_ts(e: &Value) -> Option<DateTime<Utc>> {
    value_ts(e.get("ts"))
}

fn in_window(e: &Value, since: Option<DateTime<Utc>>) -> bool {
    match since {
        None => true,
        Some(s) => event_ts(e).is_some_and(|t| t >= s),
    }
}

fn user_id(e: &Value) -> Option<&str> {
    e.get("user_id").and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn count_distinct_users(events: &[Value], since: Option<DateTime<Utc>>) -> u64 {
    events
        .iter()
        .filter(|e| in_window(e, since))
        .filter_map(user_id)
        .collect::<HashSet<_>>()
        .len() as u64
}

/// Sum of a numeric `meta` field over `token_usage` events.
fn sum_meta(events: &[Value], since: Option<DateTime<Utc>>, field: &str) -> f64 {
    events
        .iter()
        .filter(|e| e.get("event_type").and_then(Value::as_str) == Some("token_usage"))
        .filter(|e| in_window(e, since))
        .filter_map(|e| e.get("meta").and_then(|m| m.get(field)))
        .map(value_as_f64)
        .sum()
}

/// Top values of a string `meta` field, most frequent first (ties by name).
fn top_by_meta(events: &[Value], since: Option<DateTime<Utc>>, field: &str, out_key: &str) -> Value {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for e in events.iter().filter(|e| in_window(e, since)) {
        if let Some(v) = e
            .get("meta")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(&str, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    Value::Array(
        ranked
            .into_iter()
            .take(TOP_N)
            .map(|(name, count)| json!({ out_key: name, "count": count }))
            .collect(),
    )
}

/// Users active in the window who were also active before it.
fn count_returning_users(events: &[Value], since: Option<DateTime<Utc>>) -> u64 {
    let Some(since) = since else {
        return 0;
    };
    let mut before = HashSet::new();
    let mut during = HashSet::new();
    for e in events {
        let (Some(uid), Some(ts)) = (user_id(e), event_ts(e)) else {
            continue;
        };
        if ts >= since {
            during.insert(uid);
        } else {
            before.insert(uid);
        }
    }
    during.intersection(&before).count() as u64
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

/// Retention per first-seen day: share of the cohort active in each offset range.
fn cohort_retention(events: &[Value], users: &[Value], since: Option<DateTime<Utc>>) -> Value {
    // (start_days, end_days) offsets from first_seen_at.
    const D1: (i64, i64) = (1, 2);
    const D7: (i64, i64) = (7, 8);
    const W1: (i64, i64) = (7, 14);
    const M1: (i64, i64) = (30, 60);

    let mut activity: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
    for e in events {
        if let (Some(uid), Some(ts)) = (user_id(e), event_ts(e)) {
            activity.entry(uid).or_default().push(ts);
        }
    }

    let mut cohorts: BTreeMap<String, [u64; 5]> = BTreeMap::new();
    for u in users {
        let Some(first_seen) = value_ts(u.get("first_seen_at")) else {
            continue;
        };
        if since.is_some_and(|s| first_seen < s) {
            continue;
        }
        let keys = [u.get("id"), u.get("phone_hash")];
        let seen: Vec<DateTime<Utc>> = keys
            .iter()
            .filter_map(|k| k.and_then(Value::as_str))
            .filter_map(|k| activity.get(k))
            .flatten()
            .copied()
            .collect();
        let active_in = |(from, to): (i64, i64)| {
            let lo = first_seen + Duration::days(from);
            let hi = first_seen + Duration::days(to);
            seen.iter().any(|t| *t >= lo && *t < hi)
        };
        let entry = cohorts
            .entry(first_seen.format("%Y-%m-%d").to_string())
            .or_insert([0; 5]);
        entry[0] += 1;
        for (i, range) in [D1, D7, W1, M1].into_iter().enumerate() {
            if active_in(range) {
                entry[i + 1] += 1;
            }
        }
    }

    Value::Array(
        cohorts
            .into_iter()
            .rev()
            .map(|(cohort, c)| {
                json!({
                    "cohort": cohort,
                    "size": c[0],
                    "d1": percent(c[1], c[0]),
                    "d7": percent(c[2], c[0]),
                    "w1": percent(c[3], c[0]),
                    "m1": percent(c[4], c[0]),
                })
            })
            .collect(),
    )
}
