//! AI summary attached to a message

use serde::{Deserialize, Serialize};

use super::Message;

/// Error string carried by placeholder summaries
pub const SUMMARY_FAILED: &str = "Failed to generate AI summary";

/// Structured summary of one message.
///
/// A degraded summary (see [`Summary::degraded`]) is still a valid value; it
/// is only distinguishable by its content and the `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// 2-3 sentence summary of the core message
    pub main_points: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub needs_response: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Summary {
    /// Placeholder used when the summarization API could not be used
    pub fn degraded(message: &Message) -> Self {
        Self {
            main_points: format!("Failed to analyze: {}", message.snippet),
            action_items: Vec::new(),
            needs_response: false,
            error: Some(SUMMARY_FAILED.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}
