//! PostgREST client for the hosted datastore (`{url}/rest/v1/...`).
//! Authenticates every request with the service key as both `apikey` and bearer token.

use crate::store::{Datastore, Filter, Query, StoreError};
use async_trait::async_trait;
use reqwest::header::CONTENT_RANGE;
use serde_json::Value;

/// Client for a PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestClient {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl PostgrestClient {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, name)
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

/// Fail on non-2xx with status and body text.
async fn check(res: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(StoreError::Api(format!("{} {}", status, body)))
}

/// Response body as JSON; an empty body (void procedures, `return=minimal`) is null.
async fn json_body(res: reqwest::Response) -> Result<Value, StoreError> {
    let text = res.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Literal for a filter operand. Strings are bare; other JSON values use their JSON text.
fn value_literal(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Element of an `in.(...)` list; strings are double-quoted so commas and parens survive.
fn in_list_literal(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => other.to_string(),
    }
}

fn filter_pair(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(col, v) => (col.clone(), format!("eq.{}", value_literal(v))),
        Filter::In(col, values) => {
            let list: Vec<String> = values.iter().map(in_list_literal).collect();
            (col.clone(), format!("in.({})", list.join(",")))
        }
        Filter::Gte(col, ts) => (col.clone(), format!("gte.{}", ts)),
        Filter::NotNull(col) => (col.clone(), "not.is.null".to_string()),
    }
}

/// Query-string pairs for filters only (used by count and update).
fn filter_pairs(query: &Query) -> Vec<(String, String)> {
    query.filters.iter().map(filter_pair).collect()
}

/// Full query-string pairs for a select: columns, filters, order, limit.
fn select_pairs(query: &Query) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(ref cols) = query.columns {
        pairs.push(("select".to_string(), cols.replace(' ', "")));
    }
    pairs.extend(filter_pairs(query));
    if let Some(ref order) = query.order {
        let dir = if order.descending { "desc" } else { "asc" };
        pairs.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(n) = query.limit {
        pairs.push(("limit".to_string(), n.to_string()));
    }
    pairs
}

/// Total from a `Content-Range` header (`0-9/42`, `*/42`). `*` totals are unknown.
fn content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// First row of a `return=representation` response, or the row itself when the body is an object.
fn first_row(body: Value, fallback: Value) -> Value {
    match body {
        Value::Array(rows) => rows.into_iter().next().unwrap_or(fallback),
        Value::Object(_) => body,
        _ => fallback,
    }
}

#[async_trait]
impl Datastore for PostgrestClient {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let res = self
            .authed(self.client.get(self.table_url(&query.table)))
            .query(&select_pairs(query))
            .send()
            .await?;
        let res = check(res).await?;
        let rows: Vec<Value> = res.json().await?;
        Ok(rows)
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let res = self
            .authed(self.client.head(self.table_url(&query.table)))
            .header("Prefer", "count=exact")
            .query(&filter_pairs(query))
            .send()
            .await?;
        let res = check(res).await?;
        let total = res
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .unwrap_or(0);
        Ok(total)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let res = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let res = check(res).await?;
        Ok(first_row(json_body(res).await?, row))
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value, StoreError> {
        let res = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .query(&[("on_conflict", on_conflict)])
            .json(&row)
            .send()
            .await?;
        let res = check(res).await?;
        Ok(first_row(json_body(res).await?, row))
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<(), StoreError> {
        let res = self
            .authed(self.client.patch(self.table_url(&query.table)))
            .header("Prefer", "return=minimal")
            .query(&filter_pairs(query))
            .json(&patch)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn rpc(&self, name: &str, args: Value) -> Result<Value, StoreError> {
        let args = if args.is_null() { serde_json::json!({}) } else { args };
        let res = self
            .authed(self.client.post(self.rpc_url(name)))
            .json(&args)
            .send()
            .await?;
        let res = check(res).await?;
        json_body(res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TABLE_EVENTS;
    use serde_json::json;

    #[test]
    fn select_pairs_use_postgrest_operators() {
        let q = Query::table(TABLE_EVENTS)
            .select("ts, event_type, channel, meta")
            .is_in("event_type", ["provider_error", "sms_outbound_failed"])
            .gte("ts", "2025-01-01T00:00:00Z")
            .not_null("meta->>latency_ms")
            .eq("status", "active")
            .order_desc("ts")
            .limit(20);
        let pairs = select_pairs(&q);
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("select"), Some("ts,event_type,channel,meta"));
        assert_eq!(
            get("event_type"),
            Some("in.(\"provider_error\",\"sms_outbound_failed\")")
        );
        assert_eq!(get("ts"), Some("gte.2025-01-01T00:00:00Z"));
        assert_eq!(get("meta->>latency_ms"), Some("not.is.null"));
        assert_eq!(get("status"), Some("eq.active"));
        assert_eq!(get("order"), Some("ts.desc"));
        assert_eq!(get("limit"), Some("20"));
    }

    #[test]
    fn filter_pairs_skip_paging() {
        let q = Query::table("users").gte("created_at", "x").limit(5);
        assert_eq!(filter_pairs(&q).len(), 1);
    }

    #[test]
    fn eq_literal_for_numbers() {
        let (_, v) = filter_pair(&Filter::Eq("interest_category".into(), json!(3)));
        assert_eq!(v, "eq.3");
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(content_range_total("0-24/3573"), Some(3573));
        assert_eq!(content_range_total("*/42"), Some(42));
        assert_eq!(content_range_total("*/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn first_row_prefers_representation() {
        let fallback = json!({ "phone": "+1" });
        assert_eq!(first_row(json!([{ "id": 1 }]), fallback.clone()), json!({ "id": 1 }));
        assert_eq!(first_row(json!([]), fallback.clone()), fallback);
        assert_eq!(first_row(Value::Null, fallback.clone()), fallback);
    }

    #[test]
    fn client_trims_base_url() {
        let c = PostgrestClient::new("https://example.supabase.co/ ", "key");
        assert_eq!(c.table_url("events"), "https://example.supabase.co/rest/v1/events");
        assert_eq!(c.rpc_url("sum_cost"), "https://example.supabase.co/rest/v1/rpc/sum_cost");
    }
}
