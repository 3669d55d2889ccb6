//! Gmail sign-in session
//!
//! Owns the access-token lifecycle: reuse of a stored token, the interactive
//! consent flow when none is available, liveness checks and teardown.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use super::api::ProfileResponse;
use super::consent::{ConsentError, ConsentFlow};
use super::token_store::{Token, TokenStore};
use super::{GMAIL_API_BASE, GMAIL_READONLY_SCOPE};
use crate::error::MailError;
use crate::http::HttpTransport;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn,
}

struct Session {
    state: AuthState,
    token: Option<Token>,
}

/// Auth session manager for the Gmail API
pub struct GmailAuth {
    store: Arc<dyn TokenStore>,
    /// `None` when no OAuth client is configured
    consent: Option<Arc<dyn ConsentFlow>>,
    http: Arc<dyn HttpTransport>,
    api_base: String,
    session: Mutex<Session>,
    /// Held for the duration of an interactive flow: one consent prompt at a time
    consent_lock: Mutex<()>,
}

impl GmailAuth {
    pub fn new(
        store: Arc<dyn TokenStore>,
        consent: Option<Arc<dyn ConsentFlow>>,
        http: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            store,
            consent,
            http,
            api_base: GMAIL_API_BASE.to_string(),
            session: Mutex::new(Session {
                state: AuthState::SignedOut,
                token: None,
            }),
            consent_lock: Mutex::new(()),
        }
    }

    /// Point the profile check at a different Gmail API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn state(&self) -> AuthState {
        self.lock_session().state
    }

    pub fn is_signed_in(&self) -> bool {
        self.state() == AuthState::SignedIn
    }

    /// Return a usable token, running the interactive consent flow only when
    /// no valid token is stored.
    ///
    /// # Errors
    /// - `AuthUnavailable` if no consent flow is configured or it cannot start
    /// - `AuthDenied` if the user cancels or the provider returns an error
    pub fn acquire_token(&self) -> Result<Token, MailError> {
        if let Some(token) = self.current_token() {
            debug!("Reusing stored access token");
            self.mark_signed_in(token.clone());
            return Ok(token);
        }

        let consent = self.consent.as_ref().ok_or(MailError::AuthUnavailable)?;

        let _flow = self.consent_lock.lock().unwrap_or_else(|e| e.into_inner());

        // A flow that finished while we waited for the lock already stored a token
        if let Some(token) = self.current_token() {
            self.mark_signed_in(token.clone());
            return Ok(token);
        }

        self.set_state(AuthState::Authenticating);

        let grant = match consent.request_token(GMAIL_READONLY_SCOPE) {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Consent flow failed: {:#}", e);
                self.set_state(AuthState::SignedOut);
                if e.downcast_ref::<ConsentError>().is_some() {
                    return Err(MailError::AuthUnavailable);
                }
                return Err(MailError::AuthDenied(format!("{:#}", e)));
            }
        };

        let token = match self.store.write(&grant.access_token, grant.expires_in) {
            Ok(token) => token,
            Err(e) => {
                // Keep the session alive in memory even if persisting failed
                warn!("Error storing token: {:#}", e);
                Token::issue(grant.access_token, grant.expires_in)
            }
        };

        info!("Signed in, token valid for {}s", grant.expires_in);
        self.mark_signed_in(token.clone());
        Ok(token)
    }

    /// Bearer token for API calls
    ///
    /// # Errors
    /// `AuthExpired` when no valid token remains
    pub fn access_token(&self) -> Result<String, MailError> {
        match self.current_token() {
            Some(token) => Ok(token.value),
            None => {
                self.set_state(AuthState::SignedOut);
                Err(MailError::AuthExpired)
            }
        }
    }

    /// Whether a stored token exists and the Gmail API still accepts it.
    ///
    /// Never fails; any network or auth problem yields `false`.
    pub fn is_session_valid(&self) -> bool {
        self.session_profile().is_some()
    }

    /// Profile of the signed-in account, confirming the token is live
    pub fn session_profile(&self) -> Option<ProfileResponse> {
        let token = self.current_token()?;
        let url = format!("{}/users/me/profile", self.api_base);
        let bearer = format!("Bearer {}", token.value);

        let response = match self.http.get(&url, &[("Authorization", bearer.as_str())]) {
            Ok(response) => response,
            Err(e) => {
                warn!("Error checking auth status: {:#}", e);
                return None;
            }
        };

        if response.status == 401 {
            info!("Stored token rejected by Gmail");
            self.invalidate();
            return None;
        }
        if !response.is_success() {
            warn!("Profile check failed with HTTP {}", response.status);
            return None;
        }

        match response.json::<ProfileResponse>() {
            Ok(profile) => {
                self.mark_signed_in(token);
                Some(profile)
            }
            Err(e) => {
                warn!("Unexpected profile response: {:#}", e);
                None
            }
        }
    }

    /// Drop the session after the server rejected the token
    pub fn invalidate(&self) {
        self.store.clear();
        let mut session = self.lock_session();
        session.token = None;
        session.state = AuthState::SignedOut;
    }

    /// Sign out locally. Safe to call repeatedly.
    pub fn logout(&self) {
        self.invalidate();
        info!("Signed out");
    }

    /// In-memory token if still valid, otherwise whatever the store holds
    fn current_token(&self) -> Option<Token> {
        {
            let mut session = self.lock_session();
            match &session.token {
                Some(token) if token.is_valid() => return Some(token.clone()),
                Some(_) => session.token = None,
                None => {}
            }
        }
        self.store.read()
    }

    fn mark_signed_in(&self, token: Token) {
        let mut session = self.lock_session();
        session.token = Some(token);
        session.state = AuthState::SignedIn;
    }

    fn set_state(&self, state: AuthState) {
        self.lock_session().state = state;
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}
