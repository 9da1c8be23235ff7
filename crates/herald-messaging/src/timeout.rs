use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::wait::WaitOutcome;
use crate::wait_set::{WaitSet, WaiterId};

/// One-shot deadline timers for waiters.
///
/// Each armed waiter gets a timer task. When the deadline passes the task tries to claim
/// the waiter from the [`WaitSet`]; if a message (or a cancel) claimed it first the timer
/// does nothing.
#[derive(Default)]
pub struct TimeoutScheduler {
    timers: Mutex<HashMap<WaiterId, AbortHandle>>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WaiterId, AbortHandle>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a timeout for `id` on `runtime`.
    ///
    /// Returns false if the waiter was claimed before its timer was in place; the timer is
    /// then dropped straight away.
    pub fn arm(
        self: &Arc<Self>,
        runtime: &Handle,
        id: WaiterId,
        deadline: Instant,
        wait_set: Weak<WaitSet>,
    ) -> bool {
        let scheduler = Arc::downgrade(self);
        let claimed_check = wait_set.clone();

        {
            // Hold the map while spawning so the task cannot remove its entry before it exists.
            let mut timers = self.lock();
            let task = runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.lock().remove(&id);
                }
                expire(id, &wait_set);
            });
            timers.insert(id, task.abort_handle());
        }

        // A send or shutdown that claimed the waiter before the insert above found no timer
        // to disarm. Any claim after the insert disarms it itself.
        let still_pending = claimed_check
            .upgrade()
            .is_some_and(|wait_set| wait_set.contains(id));
        if !still_pending {
            self.disarm(id);
            debug!(
                target: "messaging",
                "Waiter {} was claimed while its timer was being armed",
                id
            );
        }
        still_pending
    }

    /// Cancel the timer for `id`. Safe to call after it fired or if none was armed.
    pub fn disarm(&self, id: WaiterId) -> bool {
        match self.lock().remove(&id) {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self) -> usize {
        let mut timers = self.lock();
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.abort();
        }
        count
    }

    /// Number of timers still waiting to fire
    pub fn armed(&self) -> usize {
        self.lock().len()
    }
}

fn expire(id: WaiterId, wait_set: &Weak<WaitSet>) {
    let Some(wait_set) = wait_set.upgrade() else {
        return;
    };

    match wait_set.cancel(id) {
        Some(waiter) => {
            debug!(target: "messaging", "Waiter {} on '{}' timed out", id, waiter.key());
            waiter.resume(WaitOutcome::TimedOut);
        }
        None => {
            debug!(target: "messaging", "Timer for waiter {} fired after it was claimed", id);
        }
    }
}
