//! Types shared across the fanout crates
//!
//! - [`account::Account`]: one outbound sending identity
//! - [`message::MessageUnit`]: one message addressed to one recipient
//! - [`logging`]: subscriber setup and the `internal!`/`outgoing!` macros

pub mod account;
pub mod logging;
pub mod message;

pub use account::{Account, SecurityMode};
pub use message::{Attachment, AttachmentContent, Body, MessageUnit};
pub use tracing;
