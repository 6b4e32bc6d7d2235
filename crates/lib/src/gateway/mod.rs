//! Gateway: the HTTP surface.
//!
//! One port serves the chat/intake API, the SMS webhook, event ingestion, the waitlist
//! and preview checks, and the admin endpoints behind Basic auth.

mod admin;
mod api;
mod error;
mod protocol;
mod server;

pub use error::ApiError;
pub use protocol::{
    EventAccepted, Health, InvokeRequest, InvokeResponse, MessagesResponse, MetricsResponse,
    PreviewAccessQuery, PreviewAccessResponse, SignupsResponse, StatsResponse, WaitlistRequest,
    WaitlistResponse,
};
pub use server::{build_router, open_datastore, run_gateway, serve_gateway, GatewayState};
