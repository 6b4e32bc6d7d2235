//! Entry channels for the intake conversation.
//!
//! The web chat and the SMS provider webhook both reduce to an [`InboundMessage`] that
//! the gateway hands to [`crate::conversation::handle_inbound`].

mod inbound;
mod sms;

pub use inbound::{InboundMessage, WEB_CHANNEL};
pub use sms::{twiml_reply, SmsWebhook, SMS_CHANNEL, TWIML_CONTENT_TYPE};
