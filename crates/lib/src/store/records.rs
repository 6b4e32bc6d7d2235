//! Typed views of datastore rows.

use crate::intake::ConversationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Row ids are uuids in some tables and bigints in others; both are carried as strings.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Null and missing both decode to the type's default.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// `conversations` row: intake state keyed by phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub phone: String,
    #[serde(default, deserialize_with = "null_default")]
    pub state: ConversationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// `messages` row: one inbound or outbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    pub phone: String,
    pub direction: Direction,
    pub body: String,
    #[serde(default, deserialize_with = "null_default")]
    pub channel: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `waitlist_users` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistUser {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    pub phone: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub consented: bool,
    #[serde(default)]
    pub interest_category: Option<u8>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `users` row (analytics identity keyed by phone hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub phone_hash: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub consent_status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Error-class event as shown in the admin drilldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    pub event_type: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    #[serde(default, deserialize_with = "null_default")]
    pub agent: String,
    #[serde(default, deserialize_with = "null_default")]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferrerCount {
    #[serde(default, deserialize_with = "null_default")]
    pub referrer_id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub count: u64,
}

/// Retention of one signup cohort, as percentages of the cohort size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionCohort {
    /// Cohort day (`YYYY-MM-DD` of first_seen_at).
    pub cohort: String,
    #[serde(default, deserialize_with = "null_default")]
    pub size: u64,
    #[serde(default, deserialize_with = "null_default")]
    pub d1: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub d7: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub w1: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub m1: f64,
}

/// Decode every row, failing on the first malformed one.
pub fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, serde_json::Error> {
    rows.into_iter().map(serde_json::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn waitlist_user_accepts_numeric_id_and_missing_fields() {
        let u: WaitlistUser = serde_json::from_value(json!({
            "id": 17,
            "phone": "+14155550123",
            "created_at": "2025-03-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(u.id, "17");
        assert!(!u.consented);
        assert!(u.interest_category.is_none());
        assert!(u.created_at.is_some());
    }

    #[test]
    fn null_columns_decode_to_defaults() {
        let agents: Vec<AgentUsage> =
            decode_rows(vec![json!({ "agent": null, "count": 3 }), json!({ "agent": "travel", "count": null })])
                .unwrap();
        assert_eq!(agents[0], AgentUsage { agent: String::new(), count: 3 });
        assert_eq!(agents[1], AgentUsage { agent: "travel".into(), count: 0 });

        let referrers: Vec<ReferrerCount> =
            decode_rows(vec![json!({ "referrer_id": null, "count": 2 })]).unwrap();
        assert_eq!(referrers[0].referrer_id, "");

        let cohorts: Vec<RetentionCohort> = decode_rows(vec![json!({
            "cohort": "2025-03-01", "size": 4, "d1": null, "d7": 25.0, "w1": null, "m1": null
        })])
        .unwrap();
        assert_eq!(cohorts[0].d1, 0.0);
        assert_eq!(cohorts[0].d7, 25.0);

        let u: WaitlistUser =
            serde_json::from_value(json!({ "phone": "+14155550123", "consented": null })).unwrap();
        assert!(!u.consented);

        let row: ConversationRow = serde_json::from_value(json!({ "phone": "+1555", "state": null })).unwrap();
        assert_eq!(row.state, ConversationState::default());
    }

    #[test]
    fn conversation_row_defaults_state() {
        let row: ConversationRow = serde_json::from_value(json!({ "phone": "+1555" })).unwrap();
        assert_eq!(row.state, ConversationState::default());
    }
}
