use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};

use crate::source::{Header, Message, MessagePart};

pub const DEFAULT_SUBJECT: &str = "No Subject";
pub const DEFAULT_SENDER: &str = "Unknown";

/// Flat view of one mailbox message, ready for classification.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub snippet: String,
}

impl RawMessage {
    /// Text the classifier should look at: the decoded body when one was
    /// recovered, otherwise the provider snippet.
    pub fn classification_text(&self) -> &str {
        if self.body.is_empty() {
            &self.snippet
        } else {
            &self.body
        }
    }
}

/// Flattens a full-format message into a [`RawMessage`].
///
/// Header lookup is case-insensitive. A missing subject becomes
/// [`DEFAULT_SUBJECT`], a missing sender [`DEFAULT_SENDER`], and an
/// absent or unparsable date the current time.
pub fn normalize(message: &Message) -> RawMessage {
    let headers: &[Header] = message
        .payload
        .as_ref()
        .map(|payload| payload.headers.as_slice())
        .unwrap_or(&[]);

    let subject = header_value(headers, "Subject").unwrap_or(DEFAULT_SUBJECT);
    let sender = header_value(headers, "From").unwrap_or(DEFAULT_SENDER);
    let date = header_value(headers, "Date")
        .and_then(parse_mail_date)
        .unwrap_or_else(Utc::now);

    let body = message
        .payload
        .as_ref()
        .map(extract_body)
        .unwrap_or_default();

    RawMessage {
        id: message.id.clone(),
        subject: subject.to_string(),
        sender: sender.to_string(),
        date,
        body,
        snippet: message.snippet.clone(),
    }
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

/// Depth-first search of the part tree for decodable plain text.
///
/// Data attached directly to a part wins regardless of MIME type.
/// Children are then scanned in order: a `text/plain` leaf with data is
/// decoded on the spot, and container parts are descended into.
fn extract_body(payload: &MessagePart) -> String {
    if let Some(data) = &payload.body.data {
        return decode_body_data(data);
    }
    for part in &payload.parts {
        if part.mime_type == "text/plain" {
            if let Some(data) = &part.body.data {
                return decode_body_data(data);
            }
        } else if !part.parts.is_empty() {
            let body = extract_body(part);
            if !body.is_empty() {
                return body;
            }
        }
    }
    String::new()
}

/// Decodes base64url body data, accepting both padded and unpadded
/// encodings. Undecodable data counts as no body at all.
fn decode_body_data(data: &str) -> String {
    let decoded = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data));
    match decoded {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Parses the leading `Mon, 01 Jan 2024` portion of a `Date` header.
/// Deliberately narrow: time of day and zone are ignored.
fn parse_mail_date(raw: &str) -> Option<DateTime<Utc>> {
    let prefix: String = raw.chars().take(16).collect();
    let date = NaiveDate::parse_from_str(prefix.trim(), "%a, %d %b %Y").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::from_naive_utc_and_offset(midnight, Utc))
}
