//! Bulk dispatch engine
//!
//! Sends a batch of messages through a pool of sending accounts, rotating
//! between them round-robin under a per-account usage cap, gating sends
//! through a rate limiter and retrying temporary failures with exponential
//! backoff. The result is a [`JobReport`] with one outcome per message.

pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

pub use config::{DispatchConfig, DispatchMode, UsageCaps};
pub use error::{
    DispatchError, DispatchFailure, InvalidJob, PoolExhausted, SendError, TransportUnavailable,
};
pub use job::{JobReport, JobRequest, OutcomeStatus, SendOutcome};
pub use orchestrator::Dispatcher;
pub use policy::RetryPolicy;
pub use pool::{AccountPool, AccountUsage, Reservation};
pub use rate_limiter::{Permit, RateLimitConfig, RateLimiter, WindowBudget};
pub use retry::{Attempted, RetryExecutor};
pub use transport::{
    Sender, SenderCache, TransportFactory,
    smtp::{SmtpTransportConfig, SmtpTransportFactory},
};
