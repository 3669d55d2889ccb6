//! Credentials and tunables for the mail and summarization services
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! The summarization API key follows the same compile-time then runtime order.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Optional settings overrides in the config directory
const SETTINGS_FILE: &str = "settings.json";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Both "installed" (desktop) and "web" credential types work for the loopback flow
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// ~/.config/mailbrief/google-credentials.json
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// API key for the chat-completion provider
#[derive(Clone)]
pub struct OpenAiCredentials {
    pub api_key: String,
}

impl std::fmt::Debug for OpenAiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiCredentials {
    pub fn load() -> Result<Self> {
        if let Some(key) = option_env!("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            return Ok(Self {
                api_key: key.to_string(),
            });
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        if api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is empty");
        }
        Ok(Self { api_key })
    }
}

/// Tunables for fetching and summarization
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Unread messages fetched per refresh
    pub max_results: usize,
    /// Messages summarized per batch before surfacing results
    pub batch_size: usize,
    /// Pause between consecutive summarization calls
    pub cooldown_ms: u64,
    /// Extra attempts after a rate-limit response
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_results: 20,
            batch_size: 3,
            cooldown_ms: 1000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load ~/.config/mailbrief/settings.json, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        if config::config_exists(SETTINGS_FILE) {
            return config::load_json(SETTINGS_FILE);
        }
        Ok(Self::default())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
