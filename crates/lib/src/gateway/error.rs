//! Handler error type and its HTTP mapping.

use crate::events::EventError;
use crate::store::StoreError;
use crate::waitlist::WaitlistError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete request; 400 `{error}`.
    #[error("{0}")]
    BadRequest(String),
    /// Preview access refused; 403 `{allowed: false, error}`.
    #[error("{0}")]
    AccessDenied(String),
    /// No datastore configured.
    #[error("Server configuration error")]
    Configuration,
    /// Datastore failure. `context` is the client-facing message; the source is only logged.
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    pub fn upstream(context: &'static str) -> impl FnOnce(StoreError) -> ApiError {
        move |source| ApiError::Upstream { context, source }
    }
}

impl From<EventError> for ApiError {
    fn from(e: EventError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<WaitlistError> for ApiError {
    fn from(e: WaitlistError) -> Self {
        match e {
            WaitlistError::Store(source) => ApiError::Upstream {
                context: "Internal server error",
                source,
            },
            e if e.is_access_denied() => ApiError::AccessDenied(e.to_string()),
            e => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
            ApiError::AccessDenied(msg) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "allowed": false, "error": msg })),
            )
                .into_response(),
            ApiError::Configuration => {
                log::error!("request needs the datastore but none is configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Server configuration error" })),
                )
                    .into_response()
            }
            ApiError::Upstream { context, source } => {
                log::error!("{}: {}", context, source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": context })),
                )
                    .into_response()
            }
        }
    }
}
