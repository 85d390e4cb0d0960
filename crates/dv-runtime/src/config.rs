#![forbid(unsafe_code)]

//! Session configuration.
//!
//! # Environment variables
//!
//! | Variable | Field | Unit |
//! |----------|-------|------|
//! | `DELTAVIEW_MAX_CACHED_MESSAGE_AGE` | [`SessionConfig::max_cached_message_age`] | script runs |
//! | `DELTAVIEW_RECONNECT_BASE_MS` | [`BackoffConfig::base`] | milliseconds |
//! | `DELTAVIEW_RECONNECT_MAX_MS` | [`BackoffConfig::max`] | milliseconds |
//! | `DELTAVIEW_RECONNECT_MAX_ATTEMPTS` | [`BackoffConfig::max_attempts`] | count, `0` = unlimited |
//! | `DELTAVIEW_GAP_TIMEOUT_MS` | [`QueueConfig::gap_timeout`] | milliseconds |
//! | `DELTAVIEW_MAX_BUFFERED_MESSAGES` | [`QueueConfig::max_buffered`] | messages |
//!
//! Unset variables keep their defaults. Unparseable values are ignored with a
//! warning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_MAX_CACHED_MESSAGE_AGE: &str = "DELTAVIEW_MAX_CACHED_MESSAGE_AGE";
pub const ENV_RECONNECT_BASE_MS: &str = "DELTAVIEW_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_MS: &str = "DELTAVIEW_RECONNECT_MAX_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "DELTAVIEW_RECONNECT_MAX_ATTEMPTS";
pub const ENV_GAP_TIMEOUT_MS: &str = "DELTAVIEW_GAP_TIMEOUT_MS";
pub const ENV_MAX_BUFFERED_MESSAGES: &str = "DELTAVIEW_MAX_BUFFERED_MESSAGES";

/// Reconnect backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay.
    pub base: Duration,
    /// Upper bound on the retry delay.
    pub max: Duration,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

/// Reorder buffer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Messages held while waiting for a missing index.
    pub max_buffered: usize,
    /// How long a gap may stay open before it is skipped.
    pub gap_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_buffered: 1024,
            gap_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Script runs a cached payload survives without being referenced.
    /// A `NewSession` message may override it.
    pub max_cached_message_age: u32,
    /// Text shown in main before the first run produces output.
    pub placeholder: String,
    pub backoff: BackoffConfig,
    pub queue: QueueConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cached_message_age: 2,
            placeholder: String::new(),
            backoff: BackoffConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `DELTAVIEW_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(age) = parse::<u32>(&lookup, ENV_MAX_CACHED_MESSAGE_AGE) {
            config.max_cached_message_age = age;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RECONNECT_BASE_MS) {
            config.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_RECONNECT_MAX_MS) {
            config.backoff.max = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse::<u32>(&lookup, ENV_RECONNECT_MAX_ATTEMPTS) {
            config.backoff.max_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_GAP_TIMEOUT_MS) {
            config.queue.gap_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = parse::<usize>(&lookup, ENV_MAX_BUFFERED_MESSAGES) {
            config.queue.max_buffered = max;
        }

        config
    }

    #[must_use]
    pub fn with_max_cached_message_age(mut self, runs: u32) -> Self {
        self.max_cached_message_age = runs;
        self
    }

    #[must_use]
    pub fn with_placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = text.into();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
