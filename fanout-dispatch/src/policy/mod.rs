//! Policy abstractions for dispatch.
//!
//! Policies are plain data with pure methods so they can be tested without a
//! transport or a runtime.
//!
//! - [`RetryPolicy`]: how many attempts a message gets and how long to wait
//!   between them

pub mod retry;

pub use retry::RetryPolicy;
