//! Access-token persistence
//!
//! Stores a single bearer token with its absolute expiry. Reads purge
//! expired records so callers never see a stale token.

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// File name of the persisted token record
pub const TOKEN_FILE: &str = "gmail_summary_token.json";

/// A bearer token and the instant (epoch ms) it stops being usable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub value: String,
    #[serde(rename = "expiry")]
    pub expires_at_ms: i64,
}

impl Token {
    /// Token valid for `ttl_secs` from now
    pub fn issue(value: impl Into<String>, ttl_secs: u64) -> Self {
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            value: value.into(),
            expires_at_ms: now_ms().saturating_add(ttl_ms),
        }
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_ms())
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Storage for the current access token.
///
/// `read` and `clear` never fail; problems are logged and the token is
/// treated as absent.
pub trait TokenStore: Send + Sync {
    /// The stored token if still valid; expired records are deleted.
    fn read(&self) -> Option<Token>;

    /// Persist `value` with an expiry `ttl_secs` from now, replacing any record.
    fn write(&self, value: &str, ttl_secs: u64) -> Result<Token>;

    /// Delete the stored record unconditionally
    fn clear(&self);
}

/// Token store backed by a JSON file (`{"token": ..., "expiry": ...}`)
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// ~/.config/mailbrief/gmail_summary_token.json
    pub fn default_location() -> Result<Self> {
        let dir = config::ensure_config_dir()?;
        Ok(Self::new(dir.join(TOKEN_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn read(&self) -> Option<Token> {
        if !self.path.exists() {
            return None;
        }

        let token: Token = match config::load_json_file(&self.path) {
            Ok(token) => token,
            Err(e) => {
                warn!("Error reading stored token: {:#}", e);
                return None;
            }
        };

        if token.is_valid() {
            return Some(token);
        }

        debug!("Stored token expired, removing {}", self.path.display());
        self.clear();
        None
    }

    fn write(&self, value: &str, ttl_secs: u64) -> Result<Token> {
        let token = Token::issue(value, ttl_secs);
        config::save_json_file(&self.path, &token)?;
        Ok(token)
    }

    fn clear(&self) {
        if let Err(e) = config::remove_file(&self.path) {
            warn!("Error removing stored token: {:#}", e);
        }
    }
}

/// Process-local token store, used by tests and ephemeral sessions
#[derive(Default)]
pub struct InMemoryTokenStore {
    token: RwLock<Option<Token>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing record (valid or not)
    pub fn with_token(token: Token) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }

    /// Whether any record is held, expired or not
    pub fn has_record(&self) -> bool {
        self.token.read().map(|t| t.is_some()).unwrap_or(false)
    }
}

impl TokenStore for InMemoryTokenStore {
    fn read(&self) -> Option<Token> {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(token) if token.is_valid() => Some(token.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    fn write(&self, value: &str, ttl_secs: u64) -> Result<Token> {
        let token = Token::issue(value, ttl_secs);
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(token)
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
