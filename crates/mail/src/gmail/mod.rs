//! Gmail API integration
//!
//! This module provides:
//! - Access-token persistence and the sign-in session
//! - The interactive OAuth2 consent flow
//! - Gmail API client for fetching unread messages
//! - Response normalization to domain models

mod auth;
mod client;
mod consent;
mod normalize;
mod token_store;

pub use auth::{AuthState, GmailAuth};
pub use client::GmailClient;
pub use consent::{ConsentError, ConsentFlow, ConsentGrant, LoopbackConsent};
pub use normalize::normalize_message;
pub use token_store::{FileTokenStore, InMemoryTokenStore, TOKEN_FILE, Token, TokenStore};

/// Gmail API base URL
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Read-only mail access is all this client needs
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Gmail API response types
pub mod api {
    use serde::Deserialize;

    use crate::models::Header;

    /// Response from listing messages; `messages` is absent when nothing matches
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Full message from Gmail API (`format=full`)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload; only the headers are used
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    /// Response from `users/me/profile`
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: Option<String>,
    }
}
