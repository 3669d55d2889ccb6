//! Message model for a fetched Gmail message

use serde::{Deserialize, Serialize};

use crate::labels;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email header (name-value pair). Names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// An unread message as returned by the mail provider.
///
/// Immutable once fetched; a refresh replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Gmail message ID
    pub id: MessageId,
    pub thread_id: Option<String>,
    /// Short plain-text preview provided by Gmail
    pub snippet: String,
    pub headers: Vec<Header>,
    /// Gmail label IDs (e.g., "INBOX", "UNREAD")
    pub label_ids: Vec<String>,
    /// Gmail's internal timestamp (milliseconds since epoch)
    pub internal_date: Option<i64>,
}

impl Message {
    pub fn builder(id: impl Into<MessageId>) -> MessageBuilder {
        MessageBuilder::new(id.into())
    }

    /// First header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or("No Subject")
    }

    pub fn from(&self) -> &str {
        self.header("From").unwrap_or("Unknown")
    }

    /// Raw `Date` header, if present
    pub fn date(&self) -> Option<&str> {
        self.header("Date")
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    pub fn is_unread(&self) -> bool {
        self.has_label(labels::UNREAD)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    thread_id: Option<String>,
    snippet: String,
    headers: Vec<Header>,
    label_ids: Vec<String>,
    internal_date: Option<i64>,
}

impl MessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            thread_id: None,
            snippet: String::new(),
            headers: Vec::new(),
            label_ids: Vec::new(),
            internal_date: None,
        }
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label_ids.push(label.into());
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = Some(internal_date);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            thread_id: self.thread_id,
            snippet: self.snippet,
            headers: self.headers,
            label_ids: self.label_ids,
            internal_date: self.internal_date,
        }
    }
}
