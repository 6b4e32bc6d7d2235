//! Invoke core library: intake conversation flow, event ingestion, metrics aggregation,
//! waitlist and the HTTP gateway, used by the `invoke` CLI.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod events;
pub mod gateway;
pub mod init;
pub mod intake;
pub mod metrics;
pub mod phone;
pub mod store;
pub mod waitlist;
