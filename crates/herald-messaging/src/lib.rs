//! Named in-process messaging
//!
//! A [`MessageBus`] lets producers announce named messages with arguments. Each send
//! runs every handler registered for the name, in registration order, on the sender's
//! thread, and then resumes every task currently waiting on the name exactly once.
//! Waiters may give up after a timeout; nothing is buffered for waiters that arrive
//! after a send.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod key;
pub mod payload;
pub mod registry;
pub mod timeout;
pub mod wait;
pub mod wait_set;

pub use bus::{BusStats, MessageBus};
pub use config::BusConfig;
pub use dispatch::SendReport;
pub use error::{FailureKind, HandlerFailure, MessageError};
pub use key::{MessageKey, ObjectIdentity, Token};
pub use payload::{Payload, Value};
pub use registry::HandlerHandle;
pub use wait::{PendingWait, Remaining, Timeout, WaitCanceller, WaitOutcome};
pub use wait_set::WaiterId;
