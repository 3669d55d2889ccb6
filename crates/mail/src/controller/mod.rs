//! Inbox orchestration
//!
//! [`InboxController`] drives sign-in, the unread fetch and batched
//! summarization, and publishes an [`InboxState`] snapshot after every step.
//! Each refresh is tagged with a generation number; results that arrive for a
//! superseded generation are dropped.

mod state;

pub use state::{InboxState, Phase};

use log::{debug, error, info, warn};
use std::sync::{Arc, RwLock};

use crate::config::Settings;
use crate::error::MailError;
use crate::gmail::{GmailAuth, GmailClient};
use crate::summarize::{PendingSummary, SummaryQueue};

pub const AUTH_FAILED: &str = "Authentication failed. Please try again.";
pub const AUTH_UNAVAILABLE: &str = "Google sign-in could not start. Check your OAuth client \
     credentials and that a local port in 8080-8090 is free.";
pub const FETCH_FAILED: &str = "Failed to fetch emails. Please try again.";
pub const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";

/// Receives a snapshot after every state change
pub type StateListener = Box<dyn Fn(&InboxState) + Send + Sync>;

pub struct InboxController {
    auth: Arc<GmailAuth>,
    gmail: Arc<GmailClient>,
    /// `None` runs the inbox without summaries
    queue: Option<Arc<SummaryQueue>>,
    max_results: usize,
    batch_size: usize,
    state: RwLock<InboxState>,
    listener: Option<StateListener>,
}

impl InboxController {
    pub const DEFAULT_BATCH_SIZE: usize = 3;

    pub fn new(gmail: Arc<GmailClient>, queue: Option<Arc<SummaryQueue>>) -> Self {
        Self {
            auth: gmail.auth().clone(),
            gmail,
            queue,
            max_results: GmailClient::DEFAULT_MAX_RESULTS,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            state: RwLock::new(InboxState::default()),
            listener: None,
        }
    }

    pub fn with_settings(self, settings: &Settings) -> Self {
        self.with_max_results(settings.max_results)
            .with_batch_size(settings.batch_size)
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_listener(
        mut self,
        listener: impl Fn(&InboxState) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn snapshot(&self) -> InboxState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn has_summaries(&self) -> bool {
        self.queue.is_some()
    }

    /// Run the interactive sign-in (or reuse a stored token), then refresh.
    pub fn sign_in(&self) -> Result<(), MailError> {
        self.update(|s| {
            s.phase = Phase::Authenticating;
            s.error = None;
        });

        match self.auth.acquire_token() {
            Ok(_) => {
                info!("Signed in to Gmail");
                self.refresh()
            }
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                let message = match e {
                    MailError::AuthUnavailable => AUTH_UNAVAILABLE,
                    _ => AUTH_FAILED,
                };
                self.update(|s| {
                    s.phase = Phase::Unauthenticated;
                    s.error = Some(message.to_string());
                });
                Err(e)
            }
        }
    }

    /// Pick up a stored session without prompting. Returns whether one was
    /// found and refreshed.
    pub fn resume(&self) -> Result<bool, MailError> {
        if !self.auth.is_session_valid() {
            debug!("No stored session to resume");
            self.update(|s| s.phase = Phase::Unauthenticated);
            return Ok(false);
        }

        info!("Resumed stored Gmail session");
        self.refresh()?;
        Ok(true)
    }

    /// Replace the message set with a fresh fetch and summarize it.
    ///
    /// Does nothing when signed out.
    pub fn refresh(&self) -> Result<(), MailError> {
        if !self.auth.is_signed_in() {
            debug!("Refresh skipped: not signed in");
            return Ok(());
        }

        let generation = self.begin_generation(|s| {
            s.phase = Phase::Fetching;
            s.messages.clear();
            s.summaries.clear();
            s.error = None;
        });

        let messages = match self.gmail.fetch_unread_messages(self.max_results) {
            Ok(messages) => messages,
            Err(e) => {
                self.fail(generation, &e);
                return Err(e);
            }
        };

        let queue = self.queue.as_ref().filter(|_| !messages.is_empty());
        let current = self.update_if_current(generation, |s| {
            s.messages = messages.clone();
            s.phase = if queue.is_some() {
                Phase::Analyzing
            } else {
                Phase::Ready
            };
        });
        if !current {
            debug!("Refresh {} superseded after fetch", generation);
            return Ok(());
        }

        let Some(queue) = queue else {
            return Ok(());
        };

        for batch in messages.chunks(self.batch_size) {
            let pending: Vec<PendingSummary> = batch
                .iter()
                .map(|message| queue.summarize(message.clone()))
                .collect();

            for handle in pending {
                let id = handle.id().clone();
                let summary = handle.wait();
                let current = self.update_if_current(generation, |s| {
                    s.summaries.insert(id, summary);
                });
                if !current {
                    debug!("Refresh {} superseded during analysis", generation);
                    return Ok(());
                }
            }
        }

        self.update_if_current(generation, |s| s.phase = Phase::Ready);
        info!("Inbox ready: {} unread", messages.len());
        Ok(())
    }

    /// End the session and drop everything shown
    pub fn sign_out(&self) {
        self.auth.logout();
        let generation = self.begin_generation(|s| *s = InboxState::default());
        debug!("Inbox state cleared (generation {})", generation);
    }

    fn fail(&self, generation: u64, err: &MailError) {
        if err.is_session_expired() {
            warn!("Gmail session expired");
            self.update_if_current(generation, |s| {
                s.phase = Phase::Unauthenticated;
                s.messages.clear();
                s.summaries.clear();
                s.error = Some(SESSION_EXPIRED.to_string());
            });
        } else {
            error!("Fetching unread messages failed: {}", err);
            self.update_if_current(generation, |s| {
                s.phase = Phase::Ready;
                s.error = Some(FETCH_FAILED.to_string());
            });
        }
    }

    /// Supersede every in-flight refresh and reset the state, as one step
    /// under the write lock. Returns the new generation.
    fn begin_generation(&self, reset: impl FnOnce(&mut InboxState)) -> u64 {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let generation = state.generation + 1;
            reset(&mut state);
            state.generation = generation;
            state.clone()
        };
        self.notify(&snapshot);
        snapshot.generation
    }

    fn update(&self, apply: impl FnOnce(&mut InboxState)) {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            apply(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    /// Apply only if `generation` is still the latest refresh
    fn update_if_current(&self, generation: u64, apply: impl FnOnce(&mut InboxState)) -> bool {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.generation != generation {
                return false;
            }
            apply(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
        true
    }

    fn notify(&self, snapshot: &InboxState) {
        if let Some(listener) = &self.listener {
            listener(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::{ConsentFlow, ConsentGrant, InMemoryTokenStore, TokenStore};
    use crate::http::{HttpResponse, ScriptedTransport};
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::Mutex;

    struct StaticConsent {
        deny: bool,
    }

    impl ConsentFlow for StaticConsent {
        fn request_token(&self, _scope: &str) -> anyhow::Result<ConsentGrant> {
            if self.deny {
                return Err(anyhow!("popup closed by user"));
            }
            Ok(ConsentGrant {
                access_token: "granted".to_string(),
                expires_in: 3600,
            })
        }
    }

    fn controller(
        store: Arc<InMemoryTokenStore>,
        consent: Option<StaticConsent>,
        http: Arc<ScriptedTransport>,
    ) -> InboxController {
        let consent = consent.map(|c| Arc::new(c) as Arc<dyn ConsentFlow>);
        let auth = Arc::new(
            GmailAuth::new(store, consent, http.clone()).with_api_base("http://gmail.test"),
        );
        let gmail = Arc::new(GmailClient::new(auth, http).with_base_url("http://gmail.test"));
        InboxController::new(gmail, None)
    }

    fn empty_inbox() -> Arc<ScriptedTransport> {
        let http = Arc::new(ScriptedTransport::new());
        http.on_get(
            "/users/me/messages?",
            HttpResponse::ok_json(json!({"resultSizeEstimate": 0})),
        );
        http
    }

    #[test]
    fn test_denied_sign_in_stays_unauthenticated() {
        let ctl = controller(
            Arc::new(InMemoryTokenStore::new()),
            Some(StaticConsent { deny: true }),
            empty_inbox(),
        );

        assert!(matches!(ctl.sign_in(), Err(MailError::AuthDenied(_))));
        let state = ctl.snapshot();
        assert_eq!(state.phase, Phase::Unauthenticated);
        assert_eq!(state.error.as_deref(), Some(AUTH_FAILED));
    }

    #[test]
    fn test_sign_in_without_identity_client() {
        let ctl = controller(Arc::new(InMemoryTokenStore::new()), None, empty_inbox());

        assert_eq!(ctl.sign_in(), Err(MailError::AuthUnavailable));
        assert_eq!(ctl.snapshot().error.as_deref(), Some(AUTH_UNAVAILABLE));
    }

    #[test]
    fn test_sign_in_with_empty_inbox_is_ready() {
        let ctl = controller(
            Arc::new(InMemoryTokenStore::new()),
            Some(StaticConsent { deny: false }),
            empty_inbox(),
        );

        ctl.sign_in().unwrap();
        let state = ctl.snapshot();
        assert_eq!(state.phase, Phase::Ready);
        assert!(state.messages.is_empty());
        assert_eq!(state.error, None);
        assert_eq!(state.generation, 1);
    }

    #[test]
    fn test_resume_without_stored_session() {
        let http = empty_inbox();
        let ctl = controller(Arc::new(InMemoryTokenStore::new()), None, http.clone());

        assert_eq!(ctl.resume(), Ok(false));
        assert_eq!(ctl.snapshot().phase, Phase::Unauthenticated);
        assert!(http.requests().is_empty());
    }

    #[test]
    fn test_resume_with_live_session_refreshes() {
        let store = Arc::new(InMemoryTokenStore::new());
        store.write("stored", 3600).unwrap();
        let http = empty_inbox();
        http.on_get(
            "/users/me/profile",
            HttpResponse::ok_json(json!({"emailAddress": "me@example.com"})),
        );
        let ctl = controller(store, None, http.clone());

        assert_eq!(ctl.resume(), Ok(true));
        assert_eq!(ctl.snapshot().phase, Phase::Ready);
        assert_eq!(http.count("/users/me/messages?"), 1);
    }

    #[test]
    fn test_server_error_sets_fetch_overlay() {
        let store = Arc::new(InMemoryTokenStore::new());
        let http = Arc::new(ScriptedTransport::new());
        http.on_get("/users/me/messages?", HttpResponse::new(500, ""));
        let ctl = controller(store.clone(), Some(StaticConsent { deny: false }), http);

        assert!(matches!(ctl.sign_in(), Err(MailError::FetchFailed(_))));
        let state = ctl.snapshot();
        assert_eq!(state.error.as_deref(), Some(FETCH_FAILED));
        assert!(state.is_signed_in());
        assert!(store.read().is_some());
    }

    #[test]
    fn test_sign_out_resets_state() {
        let store = Arc::new(InMemoryTokenStore::new());
        let ctl = controller(store.clone(), Some(StaticConsent { deny: false }), empty_inbox());
        ctl.sign_in().unwrap();

        ctl.sign_out();
        let state = ctl.snapshot();
        assert_eq!(state.phase, Phase::Unauthenticated);
        assert_eq!(state.generation, 2);
        assert!(store.read().is_none());

        // Refresh is a no-op once signed out
        ctl.refresh().unwrap();
        assert_eq!(ctl.snapshot(), state);
    }

    #[test]
    fn test_newer_generation_rejects_stale_updates() {
        let ctl = controller(Arc::new(InMemoryTokenStore::new()), None, empty_inbox());

        let first = ctl.begin_generation(|s| s.phase = Phase::Fetching);
        let second = ctl.begin_generation(|s| *s = InboxState::default());
        assert!(second > first);

        let applied = ctl.update_if_current(first, |s| {
            s.phase = Phase::Ready;
            s.error = Some(FETCH_FAILED.to_string());
        });
        assert!(!applied);

        let state = ctl.snapshot();
        assert_eq!(state.generation, second);
        assert_eq!(state.phase, Phase::Unauthenticated);
        assert_eq!(state.error, None);
        assert!(ctl.update_if_current(second, |s| s.phase = Phase::Ready));
    }

    #[test]
    fn test_reset_cannot_roll_generation_back() {
        let ctl = controller(Arc::new(InMemoryTokenStore::new()), None, empty_inbox());
        ctl.begin_generation(|s| s.phase = Phase::Fetching);

        // A reset that replaces the whole state still gets the next number
        let generation = ctl.begin_generation(|s| {
            *s = InboxState {
                generation: 0,
                ..InboxState::default()
            }
        });
        assert_eq!(generation, 2);
        assert_eq!(ctl.snapshot().generation, 2);
        assert!(!ctl.update_if_current(0, |s| s.phase = Phase::Ready));
    }

    #[test]
    fn test_listener_sees_each_phase() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ctl = {
            let seen = seen.clone();
            controller(
                Arc::new(InMemoryTokenStore::new()),
                Some(StaticConsent { deny: false }),
                empty_inbox(),
            )
            .with_listener(move |s| seen.lock().unwrap().push(s.phase))
        };

        ctl.sign_in().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Phase::Authenticating, Phase::Fetching, Phase::Ready]
        );
    }
}
