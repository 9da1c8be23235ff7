use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::MessageError;
use crate::key::MessageKey;
use crate::payload::Payload;
use crate::wait::{Remaining, WaitOutcome};

/// Unique identifier for a waiter; also its enqueue order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A suspended consumer.
///
/// Owning a `Waiter` is owning the right to resume it: it leaves the set exactly once,
/// and `resume` consumes it.
pub struct Waiter {
    id: WaiterId,
    key: MessageKey,
    deadline: Option<Instant>,
    resume: oneshot::Sender<WaitOutcome>,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resume with a message, computing the time left against `now`
    pub(crate) fn deliver(self, payload: Payload, now: Instant) -> bool {
        let remaining = match self.deadline {
            Some(deadline) => Remaining::Left(deadline.saturating_duration_since(now)),
            None => Remaining::Unbounded,
        };
        self.resume(WaitOutcome::Received { remaining, payload })
    }

    /// Returns false if the consumer stopped listening in the meantime
    pub(crate) fn resume(self, outcome: WaitOutcome) -> bool {
        self.resume.send(outcome).is_ok()
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct WaitSetState {
    waiters: HashMap<MessageKey, BTreeMap<WaiterId, Waiter>>,
    keys_by_id: HashMap<WaiterId, MessageKey>,
    next_id: u64,
    closed: bool,
}

/// Pending waiters per key.
///
/// Every removal (`drain`, `cancel`, `close`) happens under one lock, which makes it the
/// claim: a waiter can only be taken out once, so it can only be resumed once.
#[derive(Default)]
pub struct WaitSet {
    state: Mutex<WaitSetState>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WaitSetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(
        &self,
        key: MessageKey,
        deadline: Option<Instant>,
    ) -> Result<(WaiterId, oneshot::Receiver<WaitOutcome>), MessageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(MessageError::BusClosed);
        }

        let id = WaiterId(state.next_id);
        state.next_id += 1;

        let (resume, receiver) = oneshot::channel();
        let waiter = Waiter {
            id,
            key: key.clone(),
            deadline,
            resume,
        };
        state.keys_by_id.insert(id, key.clone());
        state.waiters.entry(key).or_default().insert(id, waiter);

        Ok((id, receiver))
    }

    /// Claim every waiter on `key`, oldest first
    pub fn drain(&self, key: &MessageKey) -> Vec<Waiter> {
        let mut state = self.lock();
        let Some(waiters) = state.waiters.remove(key) else {
            return Vec::new();
        };
        for id in waiters.keys() {
            state.keys_by_id.remove(id);
        }
        waiters.into_values().collect()
    }

    /// Claim one waiter. `None` means it was already claimed (or never existed).
    pub fn cancel(&self, id: WaiterId) -> Option<Waiter> {
        let mut state = self.lock();
        let key = state.keys_by_id.remove(&id)?;
        let waiters = state.waiters.get_mut(&key)?;
        let waiter = waiters.remove(&id);
        if waiters.is_empty() {
            state.waiters.remove(&key);
        }
        waiter
    }

    /// Claim everything and refuse further enqueues
    pub fn close(&self) -> Vec<Waiter> {
        let mut state = self.lock();
        state.closed = true;
        state.keys_by_id.clear();
        let mut all: Vec<Waiter> = state
            .waiters
            .drain()
            .flat_map(|(_, waiters)| waiters.into_values())
            .collect();
        all.sort_by_key(Waiter::id);
        all
    }

    /// True while `id` is enqueued and unclaimed
    pub fn contains(&self, id: WaiterId) -> bool {
        self.lock().keys_by_id.contains_key(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn pending(&self, key: &MessageKey) -> usize {
        self.lock().waiters.get(key).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.lock().keys_by_id.len()
    }
}
