//! Gmail API response normalization
//!
//! Converts Gmail API responses to domain [`Message`]s.

use super::api::GmailMessage;
use crate::models::{Message, MessageId};

/// Normalize a `format=full` Gmail message.
///
/// Headers are kept in wire order so first-match lookups behave like Gmail's
/// own UI. The snippet arrives HTML-escaped and is decoded here.
pub fn normalize_message(gmail_msg: GmailMessage) -> Message {
    let headers = gmail_msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    // internalDate is a decimal string of epoch milliseconds
    let internal_date = gmail_msg
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok());

    Message {
        id: MessageId::new(gmail_msg.id),
        thread_id: gmail_msg.thread_id,
        snippet: decode_html_entities(&gmail_msg.snippet),
        headers,
        label_ids: gmail_msg.label_ids.unwrap_or_default(),
        internal_date,
    }
}

fn decode_html_entities(s: &str) -> String {
    // &amp; last, so "&amp;lt;" stays "&lt;"
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
