//! Inbound chat message: delivered to the gateway for an intake turn.

/// Channel name recorded for the web demo chat.
pub const WEB_CHANNEL: &str = "web";

/// A message from a sender on some channel, answered by the intake flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel name stored on message rows and new waitlist entries (`web`, `sms`).
    pub channel: String,
    /// Sender phone number as received; normalized by the conversation handler.
    pub from: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            from: from.into(),
            text: text.into(),
        }
    }
}
