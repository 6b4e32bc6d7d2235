//! Integration tests for the public and admin HTTP endpoints against the in-memory datastore.

use invoke::config::{AdminCredentials, Config};
use invoke::gateway::{build_router, GatewayState};
use invoke::store::{Datastore, MemoryStore, TABLE_EVENTS, TABLE_MESSAGES, TABLE_WAITLIST_USERS};
use serde_json::{json, Value};
use std::sync::Arc;

struct TestServer {
    base: String,
    store: Arc<MemoryStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(admin: Option<AdminCredentials>, with_store: bool) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let shared: Option<Arc<dyn Datastore>> = if with_store {
        Some(store.clone())
    } else {
        None
    };
    let app = build_router(GatewayState::new(Config::default(), shared, admin));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    TestServer {
        base: format!("http://{}", addr),
        store,
        handle,
    }
}

fn creds() -> AdminCredentials {
    AdminCredentials {
        user: "ops".to_string(),
        pass: "s3cret".to_string(),
    }
}

#[tokio::test]
async fn invoke_runs_the_intake_flow() {
    let server = serve(None, true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/invoke", server.base);

    let resp = client
        .post(&url)
        .json(&json!({ "from": "+14155550123", "body": "//invoke" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["state"]["step"], "awaiting_category");
    assert!(body.get("category").is_none());

    let body: Value = client
        .post(&url)
        .json(&json!({ "from": "+14155550123", "body": "2" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"]["step"], "completed");
    assert_eq!(body["category"], 2);
    assert_eq!(server.store.len(TABLE_MESSAGES).await, 4);
}

#[tokio::test]
async fn invoke_rejects_incomplete_and_malformed_bodies() {
    let server = serve(None, true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/invoke", server.base);

    let resp = client.post(&url).json(&json!({ "from": "+14155550123" })).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Phone number (from) and message body are required");

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn sms_webhook_answers_with_twiml() {
    let server = serve(None, true).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/sms", server.base))
        .form(&[("From", "+14155550123"), ("Body", "hello")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/xml")
    );
    let text = resp.text().await.unwrap();
    assert!(text.starts_with("<?xml"));
    assert!(text.contains("<Message>"));
    assert_eq!(server.store.len(TABLE_WAITLIST_USERS).await, 1);
}

#[tokio::test]
async fn events_validate_before_recording() {
    let server = serve(None, true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/events", server.base);

    let resp = client
        .post(&url)
        .json(&json!({ "event_type": "page_view", "channel": "web_demo", "meta": { "path": "/" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));

    for bad in [
        json!({ "channel": "sms" }),
        json!({ "event_type": "nope", "channel": "sms" }),
        json!({ "event_type": "page_view", "channel": "fax" }),
        json!({ "event_type": "message_sent", "channel": "sms", "meta": { "body": "hi" } }),
    ] {
        let resp = client.post(&url).json(&bad).send().await.unwrap();
        assert_eq!(resp.status(), 400, "payload {}", bad);
    }
    assert_eq!(server.store.len(TABLE_EVENTS).await, 1);
}

#[tokio::test]
async fn waitlist_join_then_preview_access() {
    let server = serve(None, true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/waitlist", server.base);

    let resp = client
        .post(&url)
        .json(&json!({ "phone": "4155550123", "consent": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["phone"], "+14155550123");
    assert_eq!(body["message"], "Successfully joined the waitlist!");

    let resp = client
        .post(&url)
        .json(&json!({ "phone": "+14155550123", "consent": "yes" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "You are already on the waitlist!");
    assert_eq!(body["status"], "waitlist");

    let resp = client
        .post(&url)
        .json(&json!({ "phone": "+14155550123", "consent": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let preview = format!("{}/api/preview/access", server.base);
    let resp = client
        .get(&preview)
        .query(&[("phone", "+14155550123")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "allowed": true, "demo": false }));

    let resp = client
        .get(&preview)
        .query(&[("phone", "+14155550999")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["allowed"], false);
    assert_eq!(body["error"], "Phone not found in waitlist");

    let resp = client.get(&preview).send().await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn demo_phone_and_validation_work_without_a_datastore() {
    let server = serve(None, false).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/api/preview/access", server.base))
        .query(&[("phone", "+19999999999")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "allowed": true, "demo": true }));

    let resp = client
        .post(format!("{}/api/waitlist", server.base))
        .json(&json!({ "consent": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/waitlist", server.base))
        .json(&json!({ "phone": "+14155550123", "consent": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Server configuration error");
}

#[tokio::test]
async fn admin_endpoints_require_basic_auth() {
    let server = serve(Some(creds()), true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/admin/stats", server.base);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers().get("www-authenticate").and_then(|v| v.to_str().ok()),
        Some("Basic realm=\"Admin Dashboard\"")
    );
    assert_eq!(resp.text().await.unwrap(), "Authentication required");

    let resp = client.get(&url).basic_auth("ops", Some("wrong")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.text().await.unwrap(), "Invalid credentials");

    let resp = client.get(format!("{}/admin", server.base)).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    client
        .post(format!("{}/api/waitlist", server.base))
        .json(&json!({ "phone": "+14155550123", "consent": true }))
        .send()
        .await
        .unwrap();
    let resp = client.get(&url).basic_auth("ops", Some("s3cret")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 1);

    let resp = client
        .get(format!("{}/api/admin/signups", server.base))
        .basic_auth("ops", Some("s3cret"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["users"][0]["phone"], "+14155550123");

    // Public endpoints stay open.
    let resp = client.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn admin_metrics_and_messages() {
    let server = serve(Some(creds()), true).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/invoke", server.base))
        .json(&json!({ "from": "+14155550123", "body": "hi" }))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/api/admin/metrics", server.base))
        .basic_auth("ops", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("public, s-maxage=60, stale-while-revalidate=300")
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    let metrics = &body["metrics"];
    assert!(metrics["h24"].is_string());
    assert!(metrics["d7"].is_string());
    assert!(metrics["d30"].is_string());
    assert_eq!(metrics["visitors24h"], 0);
    assert_eq!(metrics["invokes7d"], 0);
    assert!(metrics["cost30d"].is_number());
    assert!(metrics["returningRate30d"].is_number());
    assert!(metrics["topAgents"].is_array());
    assert!(metrics["retention"].is_array());
    assert!(metrics["generatedAt"].is_string());

    let body: Value = client
        .get(format!("{}/api/admin/messages", server.base))
        .basic_auth("ops", Some("s3cret"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    let mut directions: Vec<&str> = messages
        .iter()
        .filter_map(|m| m["direction"].as_str())
        .collect();
    directions.sort();
    assert_eq!(directions, ["inbound", "outbound"]);
}
