//! Public endpoints: chat turn, SMS webhook, event ingestion, waitlist, preview access.

use crate::channels::{twiml_reply, InboundMessage, SmsWebhook, TWIML_CONTENT_TYPE, WEB_CHANNEL};
use crate::conversation::handle_inbound;
use crate::events::{ingest_event, EventRequest};
use crate::gateway::error::ApiError;
use crate::gateway::protocol::{
    EventAccepted, InvokeRequest, InvokeResponse, PreviewAccessQuery, PreviewAccessResponse,
    WaitlistRequest, WaitlistResponse,
};
use crate::gateway::server::GatewayState;
use crate::waitlist::{
    check_preview_access, join_waitlist, validate_signup, JoinOutcome, PreviewAccess, WaitlistError,
    DEMO_PHONE,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;

/// Parse a JSON body, answering 400 on malformed input.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        log::debug!("rejecting malformed JSON body: {}", e);
        ApiError::BadRequest("Invalid JSON body".to_string())
    })
}

/// POST /api/invoke: one intake turn for the web chat.
pub(crate) async fn invoke(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<InvokeResponse>, ApiError> {
    let req: InvokeRequest = parse_json(&body)?;
    let (Some(from), Some(text)) = (
        req.from.filter(|f| !f.trim().is_empty()),
        req.body.filter(|b| !b.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Phone number (from) and message body are required".to_string(),
        ));
    };
    let channel = req
        .channel
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| WEB_CHANNEL.to_string());
    let store = state.store()?;
    let turn = handle_inbound(store, InboundMessage::new(channel, from, text))
        .await
        .map_err(ApiError::upstream("Internal server error"))?;
    Ok(Json(InvokeResponse {
        success: true,
        reply: turn.reply.reply,
        state: turn.reply.state,
        category: turn.reply.category,
    }))
}

/// POST /sms: SMS provider webhook, answered inline with TwiML.
pub(crate) async fn sms_webhook(
    State(state): State<GatewayState>,
    Form(form): Form<SmsWebhook>,
) -> Result<Response, ApiError> {
    let Some(msg) = form.into_inbound() else {
        return Err(ApiError::BadRequest("From and Body are required".to_string()));
    };
    let store = state.store()?;
    let turn = handle_inbound(store, msg)
        .await
        .map_err(ApiError::upstream("Internal server error"))?;
    Ok((
        [(header::CONTENT_TYPE, TWIML_CONTENT_TYPE)],
        twiml_reply(Some(&turn.reply.reply)),
    )
        .into_response())
}

/// POST /api/events: validate and record an analytics event.
pub(crate) async fn events(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<EventAccepted>, ApiError> {
    let req: EventRequest = parse_json(&body)?;
    let event = req.validate()?;
    let store = state.store()?;
    let id = ingest_event(store, event)
        .await
        .map_err(ApiError::upstream("Failed to record event"))?;
    Ok(Json(EventAccepted { ok: true, id }))
}

/// POST /api/waitlist: 201 for a new signup, 200 when the number is already listed.
pub(crate) async fn waitlist(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WaitlistResponse>), ApiError> {
    let req: WaitlistRequest = parse_json(&body)?;
    // Validation errors take precedence over a missing datastore.
    validate_signup(req.phone.as_deref(), &req.consent)?;
    let store = state.store()?;
    let outcome = join_waitlist(store, req.phone.as_deref(), &req.consent).await?;
    Ok(match outcome {
        JoinOutcome::Joined { phone, user } => (
            StatusCode::CREATED,
            Json(WaitlistResponse {
                success: true,
                message: "Successfully joined the waitlist!".to_string(),
                phone,
                user: Some(user),
                status: None,
            }),
        ),
        JoinOutcome::AlreadyJoined { phone, status } => (
            StatusCode::OK,
            Json(WaitlistResponse {
                success: true,
                message: "You are already on the waitlist!".to_string(),
                phone,
                user: None,
                status,
            }),
        ),
    })
}

/// An unescaped `+` in a query string decodes to a space; put it back for phone numbers.
fn restore_plus(phone: &str) -> String {
    match phone.strip_prefix(' ') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => format!("+{}", rest.trim_end()),
        _ => phone.trim().to_string(),
    }
}

/// GET /api/preview/access?phone=
pub(crate) async fn preview_access(
    State(state): State<GatewayState>,
    Query(query): Query<PreviewAccessQuery>,
) -> Result<Json<PreviewAccessResponse>, ApiError> {
    let phone = query
        .phone
        .as_deref()
        .map(restore_plus)
        .filter(|p| !p.is_empty())
        .ok_or(WaitlistError::AccessPhoneRequired)?;
    // The demo number needs no datastore.
    let access = if phone == DEMO_PHONE {
        PreviewAccess::Demo
    } else {
        check_preview_access(state.store()?, Some(phone.as_str())).await?
    };
    Ok(Json(PreviewAccessResponse {
        allowed: true,
        demo: access == PreviewAccess::Demo,
    }))
}
