//! Retry policy for resumptions

use crate::error::DownloadError;
use resumio_types::DownloadSettings;
use std::time::Duration;

/// Decides whether a failed segment may be resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of resumptions (0 = disabled)
    max_retries: u32,
    /// Delay before the first resumption, doubled for each later one
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy allowing up to `max_retries` resumptions
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Set the backoff base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Policy that never resumes
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether resumption is enabled at all
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Whether another resumption may follow `attempts` completed ones
    pub fn should_retry(&self, attempts: u32, error: &DownloadError) -> bool {
        attempts < self.max_retries && error.is_transient()
    }

    /// Delay before the `attempt`-th resumption (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadSettings::default())
    }
}

impl From<&DownloadSettings> for RetryPolicy {
    fn from(settings: &DownloadSettings) -> Self {
        Self::new(settings.max_retries)
            .with_base_delay(Duration::from_millis(settings.retry_delay_ms))
    }
}
