//! Admin surface behind HTTP Basic auth: metrics snapshot, waitlist size, latest signups
//! and messages.

use crate::config::AdminCredentials;
use crate::gateway::error::ApiError;
use crate::gateway::protocol::{MessagesResponse, MetricsResponse, SignupsResponse, StatsResponse};
use crate::gateway::server::GatewayState;
use crate::metrics::{collect_snapshot, MetricsOptions, RECENT_LIMIT};
use crate::store::records::decode_rows;
use crate::store::{Query, StoreError, TABLE_MESSAGES, TABLE_WAITLIST_USERS};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

pub const ADMIN_REALM: &str = "Basic realm=\"Admin Dashboard\"";

/// (user, pass) from an `Authorization: Basic ...` header value.
fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        encoded.trim(),
    )
    .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Compare digests so the comparison cost does not depend on where the inputs differ.
fn credentials_match(expected: &AdminCredentials, user: &str, pass: &str) -> bool {
    let user_ok = Sha256::digest(user.as_bytes()) == Sha256::digest(expected.user.as_bytes());
    let pass_ok = Sha256::digest(pass.as_bytes()) == Sha256::digest(expected.pass.as_bytes());
    user_ok & pass_ok
}

fn unauthorized(message: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, ADMIN_REALM)],
        message,
    )
        .into_response()
}

/// Gate for `/admin` and `/api/admin/*`. Open when no credentials are configured.
pub(crate) async fn require_basic_auth(
    State(state): State<GatewayState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ref expected) = state.admin else {
        return next.run(req).await;
    };
    let Some(value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthorized("Authentication required");
    };
    match parse_basic(value) {
        Some((user, pass)) if credentials_match(expected, &user, &pass) => next.run(req).await,
        Some(_) => {
            log::warn!("admin: rejected credentials for {}", req.uri().path());
            unauthorized("Invalid credentials")
        }
        None => unauthorized("Authentication required"),
    }
}

/// GET /admin: index of admin endpoints.
pub(crate) async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "invoke",
        "endpoints": [
            "/api/admin/metrics",
            "/api/admin/stats",
            "/api/admin/signups",
            "/api/admin/messages",
        ],
    }))
}

/// GET /api/admin/metrics
pub(crate) async fn metrics(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    let store = state.store()?;
    let options = MetricsOptions {
        extended: state.config.metrics.extended,
    };
    let snapshot = collect_snapshot(store, options, Utc::now())
        .await
        .map_err(ApiError::upstream("Internal server error"))?;
    let cache = format!(
        "public, s-maxage={}, stale-while-revalidate=300",
        state.config.metrics.cache_seconds
    );
    Ok((
        [(header::CACHE_CONTROL, cache)],
        Json(MetricsResponse {
            ok: true,
            metrics: snapshot,
        }),
    )
        .into_response())
}

/// GET /api/admin/stats: waitlist size.
pub(crate) async fn stats(State(state): State<GatewayState>) -> Result<Json<StatsResponse>, ApiError> {
    let count = state
        .store()?
        .count(&Query::table(TABLE_WAITLIST_USERS))
        .await
        .map_err(ApiError::upstream("Failed to load stats"))?;
    Ok(Json(StatsResponse { count }))
}

/// GET /api/admin/signups: latest waitlist entries.
pub(crate) async fn signups(State(state): State<GatewayState>) -> Result<Json<SignupsResponse>, ApiError> {
    let query = Query::table(TABLE_WAITLIST_USERS)
        .select("id, phone, source, status, consented, interest_category, created_at")
        .order_desc("created_at")
        .limit(RECENT_LIMIT);
    let rows = state
        .store()?
        .select(&query)
        .await
        .map_err(ApiError::upstream("Failed to load signups"))?;
    let users = decode_rows(rows)
        .map_err(StoreError::from)
        .map_err(ApiError::upstream("Failed to load signups"))?;
    Ok(Json(SignupsResponse { users }))
}

/// GET /api/admin/messages: latest chat messages in both directions.
pub(crate) async fn messages(State(state): State<GatewayState>) -> Result<Json<MessagesResponse>, ApiError> {
    let query = Query::table(TABLE_MESSAGES)
        .select("id, phone, direction, body, channel, created_at")
        .order_desc("created_at")
        .limit(RECENT_LIMIT);
    let rows = state
        .store()?
        .select(&query)
        .await
        .map_err(ApiError::upstream("Failed to load messages"))?;
    let messages = decode_rows(rows)
        .map_err(StoreError::from)
        .map_err(ApiError::upstream("Failed to load messages"))?;
    Ok(Json(MessagesResponse { messages }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, s)
    }

    #[test]
    fn parses_basic_header() {
        let header = format!("Basic {}", encode("ops:pa:ss"));
        assert_eq!(parse_basic(&header), Some(("ops".to_string(), "pa:ss".to_string())));
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic(&format!("Basic {}", encode("nocolon"))), None);
    }

    #[test]
    fn credential_comparison() {
        let creds = AdminCredentials {
            user: "ops".to_string(),
            pass: "s3cret".to_string(),
        };
        assert!(credentials_match(&creds, "ops", "s3cret"));
        assert!(!credentials_match(&creds, "ops", "s3cre"));
        assert!(!credentials_match(&creds, "admin", "s3cret"));
    }
}
