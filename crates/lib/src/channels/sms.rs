//! SMS provider webhook: form-encoded `From`/`Body`, answered inline with TwiML.

use crate::channels::InboundMessage;
use serde::Deserialize;

pub const SMS_CHANNEL: &str = "sms";
pub const TWIML_CONTENT_TYPE: &str = "application/xml";

/// Webhook form fields we read. The provider sends many more; they are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SmsWebhook {
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
}

impl SmsWebhook {
    /// The inbound message, or `None` when the sender or body is missing.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let from = self.from.filter(|f| !f.trim().is_empty())?;
        let body = self.body.filter(|b| !b.is_empty())?;
        Some(InboundMessage::new(SMS_CHANNEL, from, body))
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// TwiML document replying with one message, or an empty response for `None`.
pub fn twiml_reply(text: Option<&str>) -> String {
    let mut doc = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    if let Some(text) = text {
        doc.push_str("<Message>");
        doc.push_str(&escape_xml(text));
        doc.push_str("</Message>");
    }
    doc.push_str("</Response>");
    doc
}
