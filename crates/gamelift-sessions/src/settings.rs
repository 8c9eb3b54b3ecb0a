//! Client settings for the game-session feature.

use crate::error::GameLiftResult;
use operation_retry_queue::{RetryStrategy, STRATEGY_CONSTANT_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CLIENT_TIMEOUT_SECONDS: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_SECONDS: u32 = 5;
pub const DEFAULT_MAX_QUEUE_SIZE: u32 = 256;
pub const DEFAULT_MAX_RETRIES: u32 = 32;
pub const DEFAULT_RETRY_STRATEGY: u32 = 0;
pub const DEFAULT_MAX_EXPONENTIAL_BACKOFF_THRESHOLD: u32 = 32;
pub const DEFAULT_PAGINATION_SIZE: u32 = 100;

/// Tuning knobs for the retrying HTTP client.
///
/// A zero in any field means "use the default". `retry_strategy` is 0 for
/// exponential backoff and 1 for a constant interval; anything else is
/// treated as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameLiftClientSettings {
    pub client_timeout_seconds: u32,
    pub retry_interval_seconds: u32,
    pub max_retry_queue_size: u32,
    pub max_retries: u32,
    pub retry_strategy: u32,
    pub max_exponential_retry_threshold: u32,
    pub pagination_size: u32,
}

impl Default for GameLiftClientSettings {
    fn default() -> Self {
        Self {
            client_timeout_seconds: DEFAULT_CLIENT_TIMEOUT_SECONDS,
            retry_interval_seconds: DEFAULT_RETRY_INTERVAL_SECONDS,
            max_retry_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_strategy: DEFAULT_RETRY_STRATEGY,
            max_exponential_retry_threshold: DEFAULT_MAX_EXPONENTIAL_BACKOFF_THRESHOLD,
            pagination_size: DEFAULT_PAGINATION_SIZE,
        }
    }
}

impl GameLiftClientSettings {
    /// Defaults, then `GAMELIFT_*` environment overrides.
    pub fn new() -> Self {
        let mut settings = Self::default();
        settings.load_from_env();
        settings.normalized()
    }

    /// Load from a JSON file (missing fields take defaults), then apply
    /// environment overrides.
    pub fn load_from_file(path: &Path) -> GameLiftResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&content)?;
        settings.load_from_env();
        Ok(settings.normalized())
    }

    /// Replace zeros and out-of-range values with defaults.
    pub fn normalized(mut self) -> Self {
        fn or_default(value: &mut u32, default: u32) {
            if *value == 0 {
                *value = default;
            }
        }

        or_default(&mut self.client_timeout_seconds, DEFAULT_CLIENT_TIMEOUT_SECONDS);
        or_default(&mut self.retry_interval_seconds, DEFAULT_RETRY_INTERVAL_SECONDS);
        or_default(&mut self.max_retry_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        or_default(&mut self.max_retries, DEFAULT_MAX_RETRIES);
        or_default(
            &mut self.max_exponential_retry_threshold,
            DEFAULT_MAX_EXPONENTIAL_BACKOFF_THRESHOLD,
        );
        or_default(&mut self.pagination_size, DEFAULT_PAGINATION_SIZE);
        if self.retry_strategy > STRATEGY_CONSTANT_INTERVAL {
            warn!(
                retry_strategy = self.retry_strategy,
                "Invalid retry strategy, using exponential backoff"
            );
            self.retry_strategy = DEFAULT_RETRY_STRATEGY;
        }
        self
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.client_timeout_seconds))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.retry_interval_seconds))
    }

    pub fn strategy(&self) -> RetryStrategy {
        RetryStrategy::from_selector(
            self.retry_strategy,
            self.retry_interval(),
            self.max_exponential_retry_threshold,
        )
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_retry_queue_size as usize
    }

    fn load_from_env(&mut self) {
        let fields: [(&str, &mut u32); 7] = [
            ("GAMELIFT_CLIENT_TIMEOUT_SECONDS", &mut self.client_timeout_seconds),
            ("GAMELIFT_RETRY_INTERVAL_SECONDS", &mut self.retry_interval_seconds),
            ("GAMELIFT_MAX_RETRY_QUEUE_SIZE", &mut self.max_retry_queue_size),
            ("GAMELIFT_MAX_RETRIES", &mut self.max_retries),
            ("GAMELIFT_RETRY_STRATEGY", &mut self.retry_strategy),
            (
                "GAMELIFT_MAX_EXPONENTIAL_RETRY_THRESHOLD",
                &mut self.max_exponential_retry_threshold,
            ),
            ("GAMELIFT_PAGINATION_SIZE", &mut self.pagination_size),
        ];

        for (name, field) in fields {
            let Ok(raw) = std::env::var(name) else {
                continue;
            };
            match raw.trim().parse::<u32>() {
                Ok(value) => *field = value,
                Err(e) => warn!(variable = name, value = %raw, error = %e, "Ignoring invalid setting override"),
            }
        }
    }
}
