//! Error taxonomy shared by the auth, fetch and controller layers

/// Failures surfaced by sign-in and inbox fetching.
///
/// Summarization never produces one of these: the queue absorbs its own
/// failures into a degraded [`crate::Summary`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    /// No identity client is configured, or its flow cannot start here
    #[error("Google sign-in is not available")]
    AuthUnavailable,

    /// The user cancelled or the provider refused the consent flow
    #[error("Google sign-in was denied: {0}")]
    AuthDenied(String),

    /// The server rejected the bearer token, or no valid token remains
    #[error("Authentication expired")]
    AuthExpired,

    /// Any other non-success response or transport failure
    #[error("Failed to fetch emails: {0}")]
    FetchFailed(String),
}

impl MailError {
    /// True for errors that tear down the local session.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, MailError::AuthExpired)
    }
}
