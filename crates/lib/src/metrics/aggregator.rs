use crate::events::{EventType, ERROR_TYPES};
use crate::metrics::{
    latency_percentiles, latency_samples, returning_rate, MetricsSnapshot, MetricsWindow,
    WindowMetrics,
};
use crate::store::records::{decode_rows, RetentionCohort};
use crate::store::{
    timestamp, value_as_f64, value_as_rows, value_as_u64, Datastore, Query, StoreError,
    RPC_COHORT_RETENTION, RPC_COUNT_DISTINCT_USERS, RPC_COUNT_RETURNING_USERS, RPC_SUM_COST,
    RPC_SUM_TOKENS, RPC_TOP_AGENTS, RPC_TOP_REFERRERS, TABLE_EVENTS, TABLE_SESSIONS, TABLE_USERS,
};
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::{json, Value};

/// Newest latency events considered for the percentiles.
pub const LATENCY_SAMPLE_LIMIT: usize = 1000;
/// Rows in each drilldown list.
pub const RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct MetricsOptions {
    /// Adds the 30 day window, returning users and cohort retention.
    pub extended: bool,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self { extended: true }
    }
}

async fn count(store: &dyn Datastore, query: Query) -> Result<u64, StoreError> {
    store.count(&query).await
}

async fn select(store: &dyn Datastore, query: Query) -> Result<Vec<Value>, StoreError> {
    store.select(&query).await
}

async fn rpc(store: &dyn Datastore, name: &str, args: Value) -> Result<Value, StoreError> {
    store.rpc(name, args).await
}

fn error_type_names() -> [&'static str; 2] {
    ERROR_TYPES.map(EventType::as_str)
}

fn events_since(event_type: EventType, since: &str) -> Query {
    Query::table(TABLE_EVENTS)
        .eq("event_type", event_type.as_str())
        .gte("ts", since)
}

async fn returning_users(store: &dyn Datastore, since: &str, extended: bool) -> Result<Option<u64>, StoreError> {
    if !extended {
        return Ok(None);
    }
    let v = rpc(store, RPC_COUNT_RETURNING_USERS, json!({ "since": since })).await?;
    Ok(Some(value_as_u64(&v)))
}

async fn window_metrics(
    store: &dyn Datastore,
    window: MetricsWindow,
    now: DateTime<Utc>,
    extended: bool,
) -> Result<WindowMetrics, StoreError> {
    let since = timestamp(window.since(now));
    let since_arg = json!({ "since": since });
    let (visitors, new_users, consented, invokes, errors, tokens, cost, returning) = tokio::try_join!(
        rpc(store, RPC_COUNT_DISTINCT_USERS, since_arg.clone()),
        count(store, Query::table(TABLE_USERS).gte("created_at", since.as_str())),
        count(store, events_since(EventType::ConsentAccepted, &since)),
        count(store, events_since(EventType::InvokeStarted, &since)),
        count(
            store,
            Query::table(TABLE_EVENTS)
                .is_in("event_type", error_type_names())
                .gte("ts", since.as_str()),
        ),
        rpc(store, RPC_SUM_TOKENS, since_arg.clone()),
        rpc(store, RPC_SUM_COST, since_arg),
        returning_users(store, &since, extended),
    )?;
    let visitors = value_as_u64(&visitors);
    Ok(WindowMetrics {
        window,
        since,
        visitors,
        new_users,
        consented,
        invokes,
        errors,
        tokens: value_as_u64(&tokens),
        cost: value_as_f64(&cost),
        returning_users: returning,
        returning_rate: returning.map(|r| returning_rate(r, visitors)),
    })
}

async fn retention(store: &dyn Datastore, since: &str, extended: bool) -> Result<Option<Vec<RetentionCohort>>, StoreError> {
    if !extended {
        return Ok(None);
    }
    let v = rpc(store, RPC_COHORT_RETENTION, json!({ "since": since })).await?;
    Ok(Some(decode_rows(value_as_rows(v))?))
}

/// Run every metrics query concurrently and assemble one snapshot.
///
/// All-or-nothing: the first failing query fails the snapshot and the rest are dropped.
/// Null or missing counts and procedure results read as zero or empty.
pub async fn collect_snapshot(
    store: &dyn Datastore,
    options: MetricsOptions,
    now: DateTime<Utc>,
) -> Result<MetricsSnapshot, StoreError> {
    let h24 = timestamp(MetricsWindow::Hours24.since(now));
    let d7 = timestamp(MetricsWindow::Days7.since(now));
    let d30 = timestamp(MetricsWindow::Days30.since(now));
    let windows = MetricsWindow::for_variant(options.extended);

    let latency_query = Query::table(TABLE_EVENTS)
        .select("meta")
        .eq("event_type", EventType::ApiLatency.as_str())
        .gte("ts", h24.as_str())
        .not_null("meta->>latency_ms")
        .order_desc("ts")
        .limit(LATENCY_SAMPLE_LIMIT);
    let recent_errors_query = Query::table(TABLE_EVENTS)
        .select("ts, event_type, channel, meta")
        .is_in("event_type", error_type_names())
        .order_desc("ts")
        .limit(RECENT_LIMIT);
    let recent_users_query = Query::table(TABLE_USERS)
        .select("id, phone_hash, country, consent_status, created_at, first_seen_at, last_seen_at")
        .order_desc("created_at")
        .limit(RECENT_LIMIT);

    let (windows, active_sessions, latency_rows, top_agents, top_referrers, recent_errors, recent_users, retention) = tokio::try_join!(
        try_join_all(windows.iter().map(|w| window_metrics(store, *w, now, options.extended))),
        count(store, Query::table(TABLE_SESSIONS).eq("status", "active")),
        select(store, latency_query),
        rpc(store, RPC_TOP_AGENTS, json!({ "since": d7 })),
        rpc(store, RPC_TOP_REFERRERS, json!({})),
        select(store, recent_errors_query),
        select(store, recent_users_query),
        retention(store, &d30, options.extended),
    )?;

    Ok(MetricsSnapshot {
        windows,
        active_sessions,
        latency: latency_percentiles(latency_samples(&latency_rows)),
        top_agents: decode_rows(value_as_rows(top_agents))?,
        top_referrers: decode_rows(value_as_rows(top_referrers))?,
        recent_errors: decode_rows(recent_errors)?,
        recent_users: decode_rows(recent_users)?,
        retention,
        generated_at: now,
    })
}
