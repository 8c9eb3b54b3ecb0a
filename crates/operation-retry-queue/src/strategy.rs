//! Retry delay policies.

use std::time::Duration;
use tracing::warn;

/// Selector value for [`RetryStrategy::ExponentialBackoff`].
pub const STRATEGY_EXPONENTIAL_BACKOFF: u32 = 0;

/// Selector value for [`RetryStrategy::ConstantInterval`].
pub const STRATEGY_CONSTANT_INTERVAL: u32 = 1;

/// How long to wait before the next attempt of a failed operation.
///
/// Both variants are expressed in multiples of the base retry `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// `interval * 2^attempts`, never more than `interval * max_threshold`.
    ExponentialBackoff { interval: Duration, max_threshold: u32 },
    /// Always `interval`.
    ConstantInterval { interval: Duration },
}

impl RetryStrategy {
    /// Build a strategy from its configuration selector.
    ///
    /// Unknown selectors fall back to exponential backoff.
    pub fn from_selector(selector: u32, interval: Duration, max_threshold: u32) -> Self {
        match selector {
            STRATEGY_CONSTANT_INTERVAL => Self::ConstantInterval { interval },
            STRATEGY_EXPONENTIAL_BACKOFF => Self::ExponentialBackoff {
                interval,
                max_threshold,
            },
            other => {
                warn!(
                    selector = other,
                    "Unknown retry strategy selector, using exponential backoff"
                );
                Self::ExponentialBackoff {
                    interval,
                    max_threshold,
                }
            }
        }
    }

    /// Delay before the next send, given the sends performed so far.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        match *self {
            Self::ConstantInterval { interval } => interval,
            Self::ExponentialBackoff {
                interval,
                max_threshold,
            } => {
                let multiplier = 1u32
                    .checked_shl(attempts)
                    .unwrap_or(u32::MAX)
                    .min(max_threshold.max(1));
                interval.saturating_mul(multiplier)
            }
        }
    }

    pub fn interval(&self) -> Duration {
        match *self {
            Self::ConstantInterval { interval } => interval,
            Self::ExponentialBackoff { interval, .. } => interval,
        }
    }
}
