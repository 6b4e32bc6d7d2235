//! Analytics event ingestion.
//!
//! Events are allow-listed by type and channel and must never carry message content in
//! `meta`. Two event types also maintain the analytics `users` table.

use crate::store::{timestamp, Datastore, Query, StoreError, TABLE_EVENTS, TABLE_USERS};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Keys that would indicate message content. Rejected at the top level of `meta` and
/// one level down.
pub const FORBIDDEN_META_KEYS: [&str; 6] = ["message", "body", "text", "content", "payload", "response"];

/// Allowed analytics event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserRegistered,
    ConsentAccepted,
    ConsentRevoked,
    SessionStarted,
    SessionEnded,
    InvokeStarted,
    InvokeCompleted,
    AgentSwitched,
    ProviderError,
    SmsOutboundFailed,
    ApiLatency,
    TokenUsage,
    PageView,
    MessageSent,
    DemoPageView,
    DemoIntakeStarted,
    DemoIntakeCompleted,
}

impl EventType {
    pub const ALL: [EventType; 17] = [
        EventType::UserRegistered,
        EventType::ConsentAccepted,
        EventType::ConsentRevoked,
        EventType::SessionStarted,
        EventType::SessionEnded,
        EventType::InvokeStarted,
        EventType::InvokeCompleted,
        EventType::AgentSwitched,
        EventType::ProviderError,
        EventType::SmsOutboundFailed,
        EventType::ApiLatency,
        EventType::TokenUsage,
        EventType::PageView,
        EventType::MessageSent,
        EventType::DemoPageView,
        EventType::DemoIntakeStarted,
        EventType::DemoIntakeCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::UserRegistered => "user_registered",
            EventType::ConsentAccepted => "consent_accepted",
            EventType::ConsentRevoked => "consent_revoked",
            EventType::SessionStarted => "session_started",
            EventType::SessionEnded => "session_ended",
            EventType::InvokeStarted => "invoke_started",
            EventType::InvokeCompleted => "invoke_completed",
            EventType::AgentSwitched => "agent_switched",
            EventType::ProviderError => "provider_error",
            EventType::SmsOutboundFailed => "sms_outbound_failed",
            EventType::ApiLatency => "api_latency",
            EventType::TokenUsage => "token_usage",
            EventType::PageView => "page_view",
            EventType::MessageSent => "message_sent",
            EventType::DemoPageView => "demo_page_view",
            EventType::DemoIntakeStarted => "demo_intake_started",
            EventType::DemoIntakeCompleted => "demo_intake_completed",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s).ok_or(())
    }
}

/// Event types counted as errors by the metrics aggregator.
pub const ERROR_TYPES: [EventType; 2] = [EventType::ProviderError, EventType::SmsOutboundFailed];

impl EventType {
    pub fn is_error(self) -> bool {
        ERROR_TYPES.contains(&self)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    WebDemo,
    Sms,
}

impl EventChannel {
    pub const ALL: [EventChannel; 2] = [EventChannel::WebDemo, EventChannel::Sms];

    pub fn as_str(self) -> &'static str {
        match self {
            EventChannel::WebDemo => "web_demo",
            EventChannel::Sms => "sms",
        }
    }
}

impl FromStr for EventChannel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s).ok_or(())
    }
}

fn joined<T: Copy>(items: &[T], name: impl Fn(T) -> &'static str) -> String {
    items.iter().map(|i| name(*i)).collect::<Vec<_>>().join(", ")
}

/// Client-side validation failures. All of them are 400s.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Missing required fields: event_type, channel")]
    MissingFields,
    #[error("Invalid event_type. Allowed: {}", joined(&EventType::ALL[..], EventType::as_str))]
    InvalidEventType(String),
    #[error("Invalid channel. Allowed: {}", joined(&EventChannel::ALL[..], EventChannel::as_str))]
    InvalidChannel(String),
    #[error("Event meta cannot contain message, body, text, content, payload, or response fields")]
    ForbiddenMeta,
}

/// Body of `POST /api/events` as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

/// A validated event ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub channel: EventChannel,
    pub meta: Value,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

/// True when no forbidden key appears in `meta` or in any object directly inside it.
pub fn meta_is_content_free(meta: &Value) -> bool {
    let Some(obj) = meta.as_object() else {
        return true;
    };
    let hit = |m: &Map<String, Value>| FORBIDDEN_META_KEYS.iter().any(|k| m.contains_key(*k));
    if hit(obj) {
        return false;
    }
    !obj.values().filter_map(Value::as_object).any(hit)
}

impl EventRequest {
    pub fn validate(self) -> Result<NewEvent, EventError> {
        let (Some(event_type), Some(channel)) = (non_empty(self.event_type), non_empty(self.channel)) else {
            return Err(EventError::MissingFields);
        };
        let event_type: EventType = event_type
            .parse()
            .map_err(|_| EventError::InvalidEventType(event_type.clone()))?;
        let channel: EventChannel = channel
            .parse()
            .map_err(|_| EventError::InvalidChannel(channel.clone()))?;
        let meta = if self.meta.is_null() { json!({}) } else { self.meta };
        if !meta_is_content_free(&meta) {
            return Err(EventError::ForbiddenMeta);
        }
        Ok(NewEvent {
            event_type,
            user_id: non_empty(self.user_id),
            session_id: non_empty(self.session_id),
            channel,
            meta,
        })
    }
}

fn meta_phone_hash(meta: &Value) -> Option<&str> {
    meta.get("phone_hash")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Insert the event and apply its side effects on `users`. Returns the new event id.
pub async fn ingest_event(store: &dyn Datastore, event: NewEvent) -> Result<String, StoreError> {
    let row = json!({
        "event_type": event.event_type.as_str(),
        "user_id": event.user_id,
        "session_id": event.session_id,
        "channel": event.channel.as_str(),
        "meta": event.meta.clone(),
    });
    let stored = store.insert(TABLE_EVENTS, row).await?;
    let id = match stored.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => String::new(),
    };

    if let Some(phone_hash) = meta_phone_hash(&event.meta) {
        if let Err(e) = apply_user_side_effect(store, event.event_type, phone_hash, &event.meta).await {
            log::error!("events: {} user update failed: {}", event.event_type, e);
        }
    }

    log::debug!("events: recorded {} on {}", event.event_type, event.channel.as_str());
    Ok(id)
}

async fn apply_user_side_effect(
    store: &dyn Datastore,
    event_type: EventType,
    phone_hash: &str,
    meta: &Value,
) -> Result<(), StoreError> {
    let now = timestamp(Utc::now());
    match event_type {
        EventType::UserRegistered => {
            let country = meta
                .get("country")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown");
            store
                .upsert(
                    TABLE_USERS,
                    json!({
                        "phone_hash": phone_hash,
                        "country": country,
                        "consent_status": "accepted",
                        "first_seen_at": now,
                        "last_seen_at": now,
                    }),
                    "phone_hash",
                )
                .await?;
        }
        EventType::ConsentAccepted => {
            store
                .update(
                    &Query::table(TABLE_USERS).eq("phone_hash", phone_hash),
                    json!({
                        "consent_status": "accepted",
                        "consent_ts": now,
                        "last_seen_at": now,
                    }),
                )
                .await?;
        }
        _ => {}
    }
    Ok(())
}
