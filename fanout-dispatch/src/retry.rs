//! Bounded retries for a single message
//!
//! [`RetryMachine`] is the pure part: it is fed the result of each attempt
//! and says whether to try again and how long to wait first.
//!
//! ```text
//! NotStarted ─begin─> Attempting(0) ─Ok──────────────> Succeeded
//!                          │ ─Permanent──────────────> Rejected
//!                          │ ─Temporary, budget left─> Waiting ─begin─> Attempting(1) ...
//!                          └ ─Temporary, no budget───> Exhausted
//! ```
//!
//! [`RetryExecutor`] drives the machine against a [`Sender`] and does the
//! sleeping.

use std::time::Duration;

use fanout_common::{MessageUnit, tracing::warn};

use crate::{
    error::{DispatchFailure, SendError},
    policy::RetryPolicy,
    transport::Sender,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryState {
    NotStarted,
    /// Zero-based index of the attempt in progress
    Attempting(u32),
    /// Backing off before attempt `next`
    Waiting { next: u32 },
    Succeeded { attempts: u32 },
    Rejected { attempts: u32, error: SendError },
    Exhausted { attempts: u32, last: SendError },
}

/// The final result for one message, however many attempts it took
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempted {
    pub attempts: u32,
    pub result: Result<(), DispatchFailure>,
}

/// What the driver should do after recording an attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Sleep for `after`, then attempt again
    Retry { after: Duration },
    /// Sleep for `after` (possibly zero), then report `outcome`
    Finish { after: Duration, outcome: Attempted },
}

#[derive(Debug)]
pub struct RetryMachine<'p> {
    policy: &'p RetryPolicy,
    state: RetryState,
    attempts_made: u32,
}

impl<'p> RetryMachine<'p> {
    pub const fn new(policy: &'p RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::NotStarted,
            attempts_made: 0,
        }
    }

    pub const fn state(&self) -> &RetryState {
        &self.state
    }

    /// Mark the next attempt as started, returning its zero-based index
    pub fn begin(&mut self) -> u32 {
        self.state = RetryState::Attempting(self.attempts_made);
        self.attempts_made
    }

    /// Record the result of the attempt in progress
    pub fn record(&mut self, result: Result<(), SendError>) -> Action {
        let index = self.attempts_made;
        self.attempts_made += 1;
        let attempts = self.attempts_made;

        match result {
            Ok(()) => {
                self.state = RetryState::Succeeded { attempts };
                Action::Finish {
                    after: Duration::ZERO,
                    outcome: Attempted {
                        attempts,
                        result: Ok(()),
                    },
                }
            }
            Err(error) if !error.is_temporary() => {
                self.state = RetryState::Rejected {
                    attempts,
                    error: error.clone(),
                };
                Action::Finish {
                    after: Duration::ZERO,
                    outcome: Attempted {
                        attempts,
                        result: Err(DispatchFailure::Rejected(error)),
                    },
                }
            }
            Err(error) => {
                let backoff = self.policy.backoff(index);

                if self.policy.should_retry(attempts) {
                    self.state = RetryState::Waiting { next: attempts };
                    return Action::Retry { after: backoff };
                }

                self.state = RetryState::Exhausted {
                    attempts,
                    last: error.clone(),
                };
                Action::Finish {
                    after: if self.policy.backoff_after_final_attempt {
                        backoff
                    } else {
                        Duration::ZERO
                    },
                    outcome: Attempted {
                        attempts,
                        result: Err(DispatchFailure::RetryBudgetExhausted {
                            attempts,
                            last: error,
                        }),
                    },
                }
            }
        }
    }
}

/// Runs a message through its attempt budget
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `message` until it succeeds, is rejected, or runs out of attempts.
    /// Exactly one [`Attempted`] is produced however many attempts were made.
    pub async fn attempt(&self, message: &MessageUnit, sender: &dyn Sender) -> Attempted {
        let mut machine = RetryMachine::new(&self.policy);

        loop {
            let index = machine.begin();
            let result = sender.send(message).await;

            match machine.record(result) {
                Action::Retry { after } => {
                    warn!(
                        recipient = %message.recipient,
                        attempt = index + 1,
                        backoff_ms = after.as_millis(),
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(after).await;
                }
                Action::Finish { after, outcome } => {
                    if !after.is_zero() {
                        tokio::time::sleep(after).await;
                    }
                    return outcome;
                }
            }
        }
    }
}
