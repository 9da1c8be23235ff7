//! The send path.
//!
//! ```text
//! send(key, payload)
//!     │
//!     ├─ 1. snapshot handlers ──── Registry (lock held only to copy the list)
//!     ├─ 2. run each handler ───── sender's thread, in registration order
//!     │       ├── Err(..)   → HandlerFailure::Error, keep going
//!     │       ├── panic     → HandlerFailure::Panicked, keep going
//!     │       └── wait(..)  → refused, HandlerFailure::SuspensionViolation
//!     ├─ 3. drain waiters ──────── WaitSet (the claim)
//!     └─ 4. disarm + resume ────── oldest waiter first, same payload for all
//! ```
//!
//! No lock is held while handlers run, so a handler may send, register or clear
//! freely. Handlers added during a send do not run for it; waiters that enqueue before
//! step 3 are woken by it.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::bus::Shared;
use crate::error::{FailureKind, HandlerFailure, MessageError};
use crate::key::MessageKey;
use crate::payload::Payload;
use crate::registry::HandlerEntry;

thread_local! {
    // One frame per handler currently running on this thread; nested sends push more.
    static HANDLER_FRAMES: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// Marks "a handler is running on this thread" for as long as it lives
struct HandlerFrame;

impl HandlerFrame {
    fn enter() -> Self {
        HANDLER_FRAMES.with(|frames| frames.borrow_mut().push(false));
        HandlerFrame
    }

    fn suspension_attempted(&self) -> bool {
        HANDLER_FRAMES.with(|frames| frames.borrow().last().copied().unwrap_or(false))
    }
}

impl Drop for HandlerFrame {
    fn drop(&mut self) {
        HANDLER_FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Record a wait attempted from inside a handler. Returns true if one is running.
pub(crate) fn refuse_if_in_handler() -> bool {
    HANDLER_FRAMES.with(|frames| match frames.borrow_mut().last_mut() {
        Some(attempted) => {
            *attempted = true;
            true
        }
        None => false,
    })
}

/// What one send did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub key: MessageKey,
    /// Handlers invoked, including ones that failed
    pub handlers_run: usize,
    pub failures: Vec<HandlerFailure>,
    pub waiters_woken: usize,
}

impl SendReport {
    /// True if every handler completed without error
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub(crate) fn dispatch(shared: &Shared, key: MessageKey, payload: Payload) -> SendReport {
    let handlers = shared.registry.snapshot(&key);
    let slow_after = shared
        .config
        .slow_handler_warn_ms
        .map(Duration::from_millis);

    let mut failures = Vec::new();
    for entry in &handlers {
        if let Some(failure) =
            invoke(entry, &payload, shared.config.isolate_panics, slow_after)
        {
            error!(target: "messaging", "Message '{}': {}", key, failure);
            failures.push(failure);
        }
    }

    let waiters = shared.wait_set.drain(&key);
    let now = tokio::time::Instant::now();
    let mut woken = 0;
    for waiter in waiters {
        shared.timeouts.disarm(waiter.id());
        let id = waiter.id();
        if waiter.deliver(payload.clone(), now) {
            woken += 1;
        } else {
            debug!(
                target: "messaging",
                "Waiter {} on '{}' stopped listening before delivery",
                id,
                key
            );
        }
    }

    debug!(
        target: "messaging",
        "Sent '{}' ({} args): {} handler(s), {} failure(s), {} waiter(s) woken",
        key,
        payload.len(),
        handlers.len(),
        failures.len(),
        woken
    );

    SendReport {
        key,
        handlers_run: handlers.len(),
        failures,
        waiters_woken: woken,
    }
}

fn invoke(
    entry: &Arc<HandlerEntry>,
    payload: &Payload,
    isolate_panics: bool,
    slow_after: Option<Duration>,
) -> Option<HandlerFailure> {
    let frame = HandlerFrame::enter();
    let started = Instant::now();

    let result = if isolate_panics {
        panic::catch_unwind(AssertUnwindSafe(|| entry.call(payload)))
    } else {
        Ok(entry.call(payload))
    };

    let elapsed = started.elapsed();
    let suspension_attempted = frame.suspension_attempted();
    drop(frame);

    if let Some(limit) = slow_after {
        if elapsed > limit {
            warn!(
                target: "messaging",
                "Handler #{} for '{}' took {:?} (limit {:?})",
                entry.sequence(),
                entry.key(),
                elapsed,
                limit
            );
        }
    }

    let kind = match result {
        _ if suspension_attempted => FailureKind::SuspensionViolation,
        Ok(Ok(())) => return None,
        Ok(Err(err)) => match err.downcast_ref::<MessageError>() {
            Some(MessageError::HandlerSuspension { .. }) => FailureKind::SuspensionViolation,
            _ => FailureKind::Error(format!("{:#}", err)),
        },
        Err(panic) => FailureKind::Panicked(panic_message(panic.as_ref())),
    };

    Some(HandlerFailure {
        sequence: entry.sequence(),
        label: entry.label().map(str::to_string),
        kind,
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
