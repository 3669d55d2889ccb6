//! Mail crate - Business logic for the unread-mail digest
//!
//! This crate provides platform-independent functionality including:
//! - Domain models (Message, Summary)
//! - Gmail OAuth sign-in with a persisted access token
//! - Gmail API client for unread inbox messages
//! - A serialized, rate-limited summarization queue
//! - The inbox controller tying these together for a front end
//!
//! All I/O is blocking and executor-agnostic; HTTP goes through the
//! [`HttpTransport`] seam so every layer can be exercised without a network.

pub mod config;
pub mod controller;
pub mod error;
pub mod gmail;
pub mod http;
pub mod models;
pub mod summarize;

/// Gmail system label ids
pub mod labels {
    pub const UNREAD: &str = "UNREAD";
}

pub use crate::config::{GmailCredentials, OpenAiCredentials, Settings};
pub use controller::{InboxController, InboxState, Phase};
pub use error::MailError;
pub use gmail::{
    AuthState, ConsentFlow, FileTokenStore, GmailAuth, GmailClient, InMemoryTokenStore,
    LoopbackConsent, Token, TokenStore, api::ProfileResponse,
};
pub use http::{HttpResponse, HttpTransport, UreqTransport};
pub use models::{Message, MessageId, Summary};
pub use summarize::{
    CompletionError, OpenAiSummarizer, RetryPolicy, Sleeper, Summarizer, SummaryQueue,
    ThreadSleeper,
};
