//! Retry policy for send attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for send attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts per message, the first one included.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// The wait after zero-based attempt `i` is `base * 2^i`.
    ///
    /// Default: 1000 (1 second)
    #[serde(default = "defaults::base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on a single backoff (in milliseconds).
    ///
    /// Default: 60000 (1 minute)
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Randomizes each backoff within ±`jitter_factor`.
    ///
    /// Any value above zero gives up the strictly increasing sequence. Values
    /// are clamped to `0.0..=1.0`; NaN and infinities disable jitter.
    ///
    /// Default: 0.0
    #[serde(default)]
    pub jitter_factor: f64,

    /// Also wait out the backoff following the final failed attempt before
    /// reporting the message as failed. The admission permit is held for the
    /// whole wait, so the provider sees the same pacing as between attempts.
    ///
    /// Default: true
    #[serde(default = "defaults::backoff_after_final_attempt")]
    pub backoff_after_final_attempt: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_backoff_ms: defaults::base_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
            jitter_factor: 0.0,
            backoff_after_final_attempt: defaults::backoff_after_final_attempt(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt budget, never less than one
    #[must_use]
    pub const fn attempt_budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Check if another attempt may follow `attempts_made` failed attempts.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.attempt_budget()
    }

    /// Get the number of remaining attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts_made: u32) -> u32 {
        self.attempt_budget().saturating_sub(attempts_made)
    }

    /// Backoff to wait after the zero-based attempt `attempt_index` failed,
    /// before jitter: `min(base * 2^attempt_index, max)`.
    #[must_use]
    pub fn base_backoff(&self, attempt_index: u32) -> Duration {
        let millis = if attempt_index >= 63 {
            self.max_backoff_ms
        } else {
            let multiplier = 1u64 << attempt_index;
            self.base_backoff_ms
                .saturating_mul(multiplier)
                .min(self.max_backoff_ms)
        };

        Duration::from_millis(millis)
    }

    /// The jitter factor actually applied
    #[must_use]
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// [`Self::base_backoff`] with jitter applied.
    #[must_use]
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let delay = self.base_backoff(attempt_index);
        let factor = self.effective_jitter();
        if factor <= 0.0 {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let range = secs * factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((secs + jitter).max(0.0))
    }

    /// The sum of every backoff a message that never succeeds will wait,
    /// without jitter.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        let waits = if self.backoff_after_final_attempt {
            self.attempt_budget()
        } else {
            self.attempt_budget() - 1
        };

        (0..waits).map(|i| self.base_backoff(i)).sum()
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_backoff_ms() -> u64 {
        1000
    }

    pub const fn max_backoff_ms() -> u64 {
        60_000
    }

    pub const fn backoff_after_final_attempt() -> bool {
        true
    }
}
