//! Gateway HTTP request and response bodies.

use crate::intake::{Category, ConversationState};
use crate::metrics::MetricsSnapshot;
use crate::store::records::{MessageRecord, WaitlistUser};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /api/invoke` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Defaults to `web`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub success: bool,
    pub reply: String,
    pub state: ConversationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub ok: bool,
    pub id: String,
}

/// `POST /api/waitlist` body. `consent` is checked for truthiness, so any JSON value is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaitlistRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub consent: Value,
}

/// Waitlist signup result; `user` for a new signup, `status` for an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistResponse {
    pub success: bool,
    pub message: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewAccessQuery {
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewAccessResponse {
    pub allowed: bool,
    pub demo: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub ok: bool,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupsResponse {
    pub users: Vec<WaitlistUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageRecord>,
}

/// `GET /` health payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
    pub port: u16,
    /// Datastore backend name, or `unconfigured`.
    pub datastore: String,
}
