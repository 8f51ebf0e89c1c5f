use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONNECT_DELAY_MS: u64 = 50;
pub const DEFAULT_TRAILING_MARGIN_MS: u64 = 200;
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_SPRITE_RETRY_MS: u64 = 1_500;
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("retry interval must be greater than zero")]
    ZeroRetryInterval,

    #[error("max_artifact_bytes must be greater than zero")]
    ZeroArtifactLimit,

    #[error("flush timeout must be greater than zero")]
    ZeroFlushTimeout,
}

/// How often (and how many times) to retry installing a watcher whose
/// playback source is not available yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval_ms: u64,

    // `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Never zero: timers reject a zero period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SPRITE_RETRY_MS,
            max_attempts: None,
        }
    }
}

/// What to do when the triggering node exposes no outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Tap the processing context's master output node instead.
    #[default]
    MasterOutput,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub connect_delay_ms: u64,
    pub trailing_margin_ms: u64,
    pub flush_timeout_ms: u64,
    pub preferred_mime_type: String,

    // Type stamped on the data URI. Empty means "whatever the recorder reports".
    pub artifact_mime_type: String,
    pub max_artifact_bytes: usize,
    pub sprite_retry: RetryPolicy,
    pub fallback: FallbackPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: DEFAULT_CONNECT_DELAY_MS,
            trailing_margin_ms: DEFAULT_TRAILING_MARGIN_MS,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            preferred_mime_type: "audio/webm; codecs=opus".into(),
            artifact_mime_type: String::new(),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            sprite_retry: RetryPolicy::default(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sprite_retry.interval_ms == 0 {
            return Err(ConfigError::ZeroRetryInterval);
        }
        if self.max_artifact_bytes == 0 {
            return Err(ConfigError::ZeroArtifactLimit);
        }
        if self.flush_timeout_ms == 0 {
            return Err(ConfigError::ZeroFlushTimeout);
        }
        Ok(())
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn trailing_margin(&self) -> Duration {
        Duration::from_millis(self.trailing_margin_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Total time a recording may run before it is force-stopped.
    pub fn countdown_for(&self, duration: Duration) -> Duration {
        duration + self.trailing_margin()
    }
}
