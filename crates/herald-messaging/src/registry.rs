use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::MessageError;
use crate::key::MessageKey;
use crate::payload::Payload;

/// Callback run synchronously on every send of its key
pub type HandlerFn = dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static;

/// A registered handler. Never mutated after registration.
pub struct HandlerEntry {
    key: MessageKey,
    sequence: u64,
    label: Option<String>,
    callback: Arc<HandlerFn>,
}

impl HandlerEntry {
    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn call(&self, payload: &Payload) -> anyhow::Result<()> {
        (self.callback)(payload)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("key", &self.key)
            .field("sequence", &self.sequence)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Receipt for a registration.
///
/// Handlers can only be removed in bulk with [`MessageBus::clear_message`], so the
/// handle is informational: it names the key and the handler's place in the order.
///
/// [`MessageBus::clear_message`]: crate::MessageBus::clear_message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerHandle {
    key: MessageKey,
    sequence: u64,
    label: Option<String>,
}

impl HandlerHandle {
    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<MessageKey, Vec<Arc<HandlerEntry>>>,
    // Shared by every key and never reset, so a handler registered after a clear
    // still sorts after everything registered before it.
    next_sequence: u64,
    closed: bool,
}

/// Ordered handler lists per key
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Handlers never run under this lock, so the map is consistent even if poisoned.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler after every handler already registered for `key`.
    ///
    /// Fails with `BusClosed` once [`close`](Self::close) has run, even if the caller checked
    /// the bus before it closed.
    pub fn register(
        &self,
        key: MessageKey,
        label: Option<String>,
        callback: Arc<HandlerFn>,
    ) -> Result<HandlerHandle, MessageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(MessageError::BusClosed);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let entry = Arc::new(HandlerEntry {
            key: key.clone(),
            sequence,
            label: label.clone(),
            callback,
        });
        state.handlers.entry(key.clone()).or_default().push(entry);

        Ok(HandlerHandle {
            key,
            sequence,
            label,
        })
    }

    /// Remove every handler for `key`, returning how many were dropped
    pub fn clear(&self, key: &MessageKey) -> usize {
        self.lock()
            .handlers
            .remove(key)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Drop every handler for every key and refuse later registrations
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let count = state.handlers.values().map(Vec::len).sum();
        state.handlers.clear();
        count
    }

    /// Copy of the current handlers for `key`, in registration order.
    ///
    /// Later registrations or clears do not affect a snapshot already taken.
    pub fn snapshot(&self, key: &MessageKey) -> Vec<Arc<HandlerEntry>> {
        self.lock()
            .handlers
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn handler_count(&self, key: &MessageKey) -> usize {
        self.lock().handlers.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn total_handlers(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    pub fn key_count(&self) -> usize {
        self.lock().handlers.len()
    }
}
