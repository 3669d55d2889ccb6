//! Pacing for outbound summarization calls

use std::time::Duration;

use crate::config::Settings;

/// Blocking delay, swappable so tests can record pauses instead of taking them
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Rate-limit handling for the summarization queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after an HTTP 429
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub base_delay: Duration,
    /// Pause after each processed item before the next one starts
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            cooldown: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            cooldown: Duration::from_millis(settings.cooldown_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}
