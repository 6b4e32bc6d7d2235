//! Waitlist signup and preview access checks.

use crate::phone::{is_valid_e164, normalize_phone};
use crate::store::records::WaitlistUser;
use crate::store::{select_one, Datastore, Query, StoreError, TABLE_WAITLIST_USERS};
use serde_json::{json, Value};

/// Always allowed into the preview, whether or not it is on the waitlist.
pub const DEMO_PHONE: &str = "+19999999999";

#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    #[error("Phone number is required")]
    PhoneRequired,
    #[error("Consent is required to join the waitlist")]
    ConsentRequired,
    #[error("Invalid phone number format. Please use E.164 format (+1234567890)")]
    InvalidPhone,
    #[error("Phone number required")]
    AccessPhoneRequired,
    #[error("Phone not found in waitlist")]
    NotFound,
    #[error("Consent not provided")]
    ConsentMissing,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WaitlistError {
    /// Preview access refusals (as opposed to malformed requests).
    pub fn is_access_denied(&self) -> bool {
        matches!(self, WaitlistError::NotFound | WaitlistError::ConsentMissing)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// New signup; carries the stored row.
    Joined { phone: String, user: Value },
    AlreadyJoined { phone: String, status: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewAccess {
    Demo,
    Allowed,
}

/// Truthiness of a loosely typed form value: `false`, `0`, `""` and `null` are false.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

async fn find_by_phone(store: &dyn Datastore, phone: &str) -> Result<Option<WaitlistUser>, StoreError> {
    let row = select_one(store, Query::table(TABLE_WAITLIST_USERS).eq("phone", phone)).await?;
    Ok(row.map(serde_json::from_value).transpose()?)
}

/// Check a signup request and return the normalized phone number.
pub fn validate_signup(phone: Option<&str>, consent: &Value) -> Result<String, WaitlistError> {
    let phone = phone.filter(|p| !p.is_empty()).ok_or(WaitlistError::PhoneRequired)?;
    if !is_truthy(consent) {
        return Err(WaitlistError::ConsentRequired);
    }
    let phone = normalize_phone(phone);
    if !is_valid_e164(&phone) {
        return Err(WaitlistError::InvalidPhone);
    }
    Ok(phone)
}

/// Add a phone number to the waitlist, or report the existing entry.
pub async fn join_waitlist(
    store: &dyn Datastore,
    phone: Option<&str>,
    consent: &Value,
) -> Result<JoinOutcome, WaitlistError> {
    let phone = validate_signup(phone, consent)?;

    if let Some(existing) = find_by_phone(store, &phone).await? {
        return Ok(JoinOutcome::AlreadyJoined {
            phone,
            status: existing.status,
        });
    }

    let row = json!({
        "phone": phone,
        "source": "web",
        "status": "waitlist",
        "consented": true,
    });
    match store.insert(TABLE_WAITLIST_USERS, row).await {
        Ok(user) => {
            log::info!("waitlist: joined {}", crate::phone::redacted(&phone));
            Ok(JoinOutcome::Joined { phone, user })
        }
        // Lost a race with a concurrent signup for the same number.
        Err(StoreError::Conflict { .. }) => {
            let status = find_by_phone(store, &phone).await?.and_then(|u| u.status);
            Ok(JoinOutcome::AlreadyJoined { phone, status })
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether `phone` may open the product preview.
pub async fn check_preview_access(
    store: &dyn Datastore,
    phone: Option<&str>,
) -> Result<PreviewAccess, WaitlistError> {
    let phone = phone
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(WaitlistError::AccessPhoneRequired)?;
    if phone == DEMO_PHONE {
        return Ok(PreviewAccess::Demo);
    }
    let user = find_by_phone(store, phone).await?.ok_or(WaitlistError::NotFound)?;
    if !user.consented {
        return Err(WaitlistError::ConsentMissing);
    }
    Ok(PreviewAccess::Allowed)
}
