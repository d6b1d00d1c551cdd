//! Process-wide dispatch configuration
//!
//! Everything here is read-only once a job starts; per-job state lives in
//! [`crate::job::Job`].

use serde::{Deserialize, Serialize};

use crate::{
    policy::RetryPolicy, rate_limiter::RateLimitConfig, transport::smtp::SmtpTransportConfig,
};

/// How the orchestrator schedules the units of one job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// One message fully resolved before the next begins
    #[default]
    Sequential,
    /// Every unit in flight as soon as the rate limiter admits it
    Concurrent,
    /// Groups of `size` units in flight together; a group drains before the
    /// next one starts
    Batched { size: usize },
}

/// Successful sends allowed per account within one job.
///
/// Keep these below the provider's real sending limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageCaps {
    #[serde(default = "defaults::usage_cap")]
    pub default: u32,

    /// Per-account overrides, keyed by identity
    #[serde(default)]
    pub overrides: ahash::AHashMap<String, u32>,
}

impl Default for UsageCaps {
    fn default() -> Self {
        Self::uniform(defaults::usage_cap())
    }
}

impl UsageCaps {
    /// The same cap for every account
    #[must_use]
    pub fn uniform(cap: u32) -> Self {
        Self {
            default: cap,
            overrides: ahash::AHashMap::default(),
        }
    }

    #[must_use]
    pub fn cap_for(&self, identity: &str) -> u32 {
        self.overrides.get(identity).copied().unwrap_or(self.default)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub usage_caps: UsageCaps,

    #[serde(default)]
    pub mode: DispatchMode,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub transport: SmtpTransportConfig,
}

mod defaults {
    /// Gmail allows 500 messages a day on consumer accounts
    pub const fn usage_cap() -> u32 {
        450
    }
}
