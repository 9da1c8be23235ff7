//! The waiting side of the bus.
//!
//! A consumer registers interest with [`MessageBus::enqueue_wait`] and gets a
//! [`PendingWait`] back. The waiter is live from that moment: any send of the key
//! issued afterwards resolves it. Exactly one of three sources resolves it:
//!
//! - a send of the key, giving [`WaitOutcome::Received`]
//! - the timer, giving [`WaitOutcome::TimedOut`]
//! - a [`WaitCanceller`], giving [`WaitOutcome::Cancelled`]
//!
//! If the bus shuts down first the future yields [`MessageError::BusClosed`].
//!
//! [`MessageBus::enqueue_wait`]: crate::MessageBus::enqueue_wait

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::bus::Shared;
use crate::error::MessageError;
use crate::key::MessageKey;
use crate::payload::Payload;
use crate::wait_set::WaiterId;

/// How long a waiter is willing to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Only a message (or cancellation) resumes the waiter
    #[default]
    Never,
    /// Give up after this long
    After(Duration),
}

impl Timeout {
    /// Timeout from a signed millisecond count.
    ///
    /// Zero and negative values become an immediate deadline, which still suspends until
    /// the timer gets to run; a send that lands first wins.
    pub fn from_millis(millis: i64) -> Self {
        Timeout::After(Duration::from_millis(millis.max(0) as u64))
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Never => None,
            Timeout::After(duration) => Some(*duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map(Timeout::After).unwrap_or(Timeout::Never)
    }
}

/// Time left on the waiter's clock when its message arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    /// The wait had no timeout
    Unbounded,
    Left(Duration),
}

/// What resumed a waiter
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The message was sent; `payload` is exactly what the sender passed
    Received {
        remaining: Remaining,
        payload: Payload,
    },
    /// No message arrived in time. Carries no payload, so it can never be confused
    /// with a message sent without arguments.
    TimedOut,
    /// Claimed by a [`WaitCanceller`]
    Cancelled,
}

impl WaitOutcome {
    pub fn is_received(&self) -> bool {
        matches!(self, WaitOutcome::Received { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitOutcome::Cancelled)
    }

    pub fn remaining(&self) -> Option<Remaining> {
        match self {
            WaitOutcome::Received { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            WaitOutcome::Received { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            WaitOutcome::Received { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// A registered waiter, resolved once by whichever source claims it first.
///
/// Dropping it before it resolves withdraws the waiter and disarms its timer.
#[must_use = "a pending wait does nothing unless awaited"]
pub struct PendingWait {
    id: WaiterId,
    key: MessageKey,
    receiver: oneshot::Receiver<WaitOutcome>,
    shared: Weak<Shared>,
    finished: bool,
}

impl PendingWait {
    pub(crate) fn new(
        id: WaiterId,
        key: MessageKey,
        receiver: oneshot::Receiver<WaitOutcome>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            key,
            receiver,
            shared,
            finished: false,
        }
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    /// Handle that can cancel this wait from elsewhere
    pub fn canceller(&self) -> WaitCanceller {
        WaitCanceller {
            id: self.id,
            shared: self.shared.clone(),
        }
    }
}

impl Future for PendingWait {
    type Output = Result<WaitOutcome, MessageError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                self.finished = true;
                Poll::Ready(Ok(outcome))
            }
            Poll::Ready(Err(_)) => {
                // The sender half was dropped without resuming: only teardown does that.
                self.finished = true;
                Poll::Ready(Err(MessageError::BusClosed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            if shared.wait_set.cancel(self.id).is_some() {
                debug!(
                    target: "messaging",
                    "Waiter {} on '{}' dropped before resuming",
                    self.id,
                    self.key
                );
            }
            shared.timeouts.disarm(self.id);
        }
    }
}

/// Cancels a pending wait through the same claim a send or timeout would use
#[derive(Debug, Clone)]
pub struct WaitCanceller {
    id: WaiterId,
    shared: Weak<Shared>,
}

impl WaitCanceller {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Returns true if this call claimed the waiter; false if something else got there first.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let Some(waiter) = shared.wait_set.cancel(self.id) else {
            return false;
        };
        shared.timeouts.disarm(self.id);
        debug!(target: "messaging", "Waiter {} on '{}' cancelled", waiter.id(), waiter.key());
        waiter.resume(WaitOutcome::Cancelled);
        true
    }
}
