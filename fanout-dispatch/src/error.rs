//! Typed errors for the dispatch engine.
//!
//! Job-level errors ([`DispatchError`]) stop a job before anything is sent.
//! Everything else is per message and ends up as a [`DispatchFailure`] on
//! that message's outcome:
//! - Temporary send failures are retried with backoff
//! - Permanent send failures are not retried
//! - An exhausted pool or an unreachable transport fails the message directly

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job-level error. No message is dispatched when one of these is returned.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] InvalidJob),
}

/// Reasons a job is rejected before dispatch begins
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidJob {
    #[error("account pool is empty")]
    NoAccounts,

    #[error("message list is empty")]
    NoMessages,

    #[error("account {0} appears more than once in the pool")]
    DuplicateAccount(String),

    #[error("message {index} has no recipient")]
    MissingRecipient { index: usize },

    #[error("message {index} to {recipient} has neither a plain nor a rich body")]
    MissingBody { index: usize, recipient: String },
}

/// Every account in the pool has reached its usage cap
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no eligible account")]
pub struct PoolExhausted;

/// A sender could not be built for an account
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("transport unavailable for {account}: {reason}")]
pub struct TransportUnavailable {
    pub account: String,
    pub reason: String,
}

/// The error from a single send attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendError {
    /// Worth retrying: throttling, 4xx replies, dropped connections, timeouts
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// The provider refused the message outright (5xx replies, bad addresses)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn temporary(reason: impl Into<String>) -> Self {
        Self::Temporary(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// The terminal reason a message was not sent.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchFailure {
    #[error("no eligible account")]
    PoolExhausted,

    #[error(transparent)]
    TransportUnavailable(#[from] TransportUnavailable),

    #[error("rejected: {0}")]
    Rejected(SendError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetryBudgetExhausted { attempts: u32, last: SendError },

    /// The task dispatching the message died before reporting back
    #[error("dispatch task failed: {0}")]
    Internal(String),
}

impl From<PoolExhausted> for DispatchFailure {
    fn from(_: PoolExhausted) -> Self {
        Self::PoolExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            DispatchFailure::from(PoolExhausted).to_string(),
            "no eligible account"
        );

        let exhausted = DispatchFailure::RetryBudgetExhausted {
            attempts: 3,
            last: SendError::temporary("421 try again later"),
        };
        assert_eq!(
            exhausted.to_string(),
            "gave up after 3 attempts: temporary failure: 421 try again later"
        );

        let unavailable = DispatchFailure::from(TransportUnavailable {
            account: "a@example.com".to_string(),
            reason: "connection refused".to_string(),
        });
        assert_eq!(
            unavailable.to_string(),
            "transport unavailable for a@example.com: connection refused"
        );
    }

    #[test]
    fn test_send_error_classification() {
        assert!(SendError::temporary("busy").is_temporary());
        assert!(!SendError::permanent("550 no such user").is_temporary());
    }
}
