//! Error types surfaced by the message bus.
//!
//! [`MessageError`] is returned directly from the call that caused it. Failures inside
//! handlers never surface here; they are collected per send as [`HandlerFailure`]s and
//! logged, so one broken handler cannot stop the rest of a dispatch.

use std::fmt;

use thiserror::Error;

use crate::key::MessageKey;

/// Errors returned by [`MessageBus`](crate::MessageBus) operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The absent key (the empty name) was passed to a bus operation.
    #[error("invalid message key: the absent key cannot be sent, handled or waited on")]
    InvalidKey,

    /// A handler tried to wait for a message while a send was dispatching it.
    #[error("handler attempted to suspend while dispatching '{key}'")]
    HandlerSuspension {
        /// Key the handler tried to wait on.
        key: MessageKey,
    },

    /// The bus was shut down before or while the operation ran.
    #[error("message bus is shut down")]
    BusClosed,

    /// A timed wait was requested outside a tokio runtime.
    #[error("timed waits require a running tokio runtime")]
    NoRuntime,
}

impl MessageError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            MessageError::InvalidKey => "invalid_key",
            MessageError::HandlerSuspension { .. } => "handler_suspension",
            MessageError::BusClosed => "bus_closed",
            MessageError::NoRuntime => "no_runtime",
        }
    }
}

/// How a single handler invocation went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The handler returned an error.
    Error(String),
    /// The handler panicked; the panic message is kept when it was a string.
    Panicked(String),
    /// The handler tried to wait on a message during dispatch.
    SuspensionViolation,
}

/// A handler failure captured at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub sequence: u64,
    pub label: Option<String>,
    pub kind: FailureKind,
}

impl HandlerFailure {
    pub fn as_label(&self) -> &'static str {
        match self.kind {
            FailureKind::Error(_) => "handler_error",
            FailureKind::Panicked(_) => "handler_panicked",
            FailureKind::SuspensionViolation => "handler_suspension",
        }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "handler #{} ({})", self.sequence, label)?,
            None => write!(f, "handler #{}", self.sequence)?,
        }
        match &self.kind {
            FailureKind::Error(message) => write!(f, " failed: {}", message),
            FailureKind::Panicked(message) => write!(f, " panicked: {}", message),
            FailureKind::SuspensionViolation => write!(f, " attempted to suspend"),
        }
    }
}
