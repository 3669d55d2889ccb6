//! Message summarization
//!
//! [`OpenAiSummarizer`] performs a single chat-completion call per message.
//! [`SummaryQueue`] serializes those calls, paces them, retries rate-limited
//! attempts and turns every failure into a degraded [`Summary`].

mod openai;
mod pacing;
mod queue;

pub use openai::{OpenAiSummarizer, strip_code_fence};
pub use pacing::{RetryPolicy, Sleeper, ThreadSleeper};
pub use queue::{PendingSummary, SummaryQueue};

use crate::models::{Message, Summary};

/// Why a single summarization attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// HTTP 429; worth retrying after a backoff
    #[error("summarization API rate limit reached (HTTP 429)")]
    RateLimited,

    #[error("summarization failed: {0}")]
    Failed(String),
}

/// One summarization attempt for one message, without retries
pub trait Summarizer: Send + Sync {
    fn summarize_once(&self, message: &Message) -> Result<Summary, CompletionError>;
}

/// The fields of a message that go into the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailDigest<'a> {
    pub subject: &'a str,
    pub from: &'a str,
    pub content: &'a str,
}

impl<'a> EmailDigest<'a> {
    pub fn from_message(message: &'a Message) -> Self {
        Self {
            subject: message.subject(),
            from: message.from(),
            content: &message.snippet,
        }
    }
}
