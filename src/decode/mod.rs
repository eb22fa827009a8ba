//! Pure MIME decoding: raw message text in, structured email out.
//!
//! No ids and no persistence here; the result store assigns ids when the
//! decoded result is written.

use crate::error::{MailspoolError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders};

/// A successfully decoded email.
#[derive(Debug, Clone)]
pub struct DecodedEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<DecodedAttachment>,
}

/// One extracted attachment, content re-encoded as base64 text.
#[derive(Debug, Clone)]
pub struct DecodedAttachment {
    pub filename: String,
    pub mime_type: String,
    pub content: String,
}

/// Decode raw MIME text into a structured email.
///
/// All-or-nothing for the message itself: a structural parse failure yields
/// an error with no partial output. Header extraction is lenient (missing
/// subject/from/to become empty strings, missing date becomes `None`).
/// Attachment extraction is the one partial spot: a part with no decodable
/// content is logged and skipped while the rest of the decode succeeds.
pub fn decode(raw: &str) -> Result<DecodedEmail> {
    if raw.trim().is_empty() {
        return Err(MailspoolError::Decode("empty message payload".to_string()));
    }

    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailspoolError::Decode("unparseable MIME structure".to_string()))?;

    let mut attachments = Vec::new();
    for part in message.attachments() {
        let filename = part.attachment_name().unwrap_or("unknown").to_string();
        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = part.contents();
        if bytes.is_empty() {
            log::warn!("Skipping attachment {:?}: no decodable content", filename);
            continue;
        }

        attachments.push(DecodedAttachment {
            filename,
            mime_type,
            content: BASE64.encode(bytes),
        });
    }

    Ok(DecodedEmail {
        from: format_addresses(message.from()),
        to: format_addresses(message.to()),
        subject: message.subject().unwrap_or_default().to_string(),
        date: message.date().and_then(convert_date),
        body_text: message.body_text(0).map(|s| s.to_string()),
        body_html: message.body_html(0).map(|s| s.to_string()),
        attachments,
    })
}

/// "Name <addr>" per mailbox, comma-separated; empty string when absent.
fn format_addresses(addr: Option<&Address<'_>>) -> String {
    let Some(addr) = addr else {
        return String::new();
    };
    addr.iter()
        .filter_map(|a| match (a.name.as_deref(), a.address.as_deref()) {
            (Some(name), Some(address)) => Some(format!("{} <{}>", name, address)),
            (None, Some(address)) => Some(address.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A Date header at or before the Unix epoch is indistinguishable from a
/// missing one; both map to `None`. Known limitation, documented in DESIGN.md.
fn convert_date(date: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let ts = date.to_timestamp();
    if ts <= 0 {
        return None;
    }
    Utc.timestamp_opt(ts, 0).single()
}
