use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::dispatch::{self, SendReport};
use crate::error::MessageError;
use crate::key::MessageKey;
use crate::payload::Payload;
use crate::registry::{HandlerHandle, Registry};
use crate::timeout::TimeoutScheduler;
use crate::wait::{PendingWait, Timeout, WaitOutcome};
use crate::wait_set::WaitSet;

pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) wait_set: Arc<WaitSet>,
    pub(crate) timeouts: Arc<TimeoutScheduler>,
    pub(crate) config: BusConfig,
    closed: AtomicBool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.timeouts.disarm_all();
    }
}

/// Counts of what the bus currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    pub handler_keys: usize,
    pub handlers: usize,
    pub pending_waiters: usize,
    pub armed_timers: usize,
}

/// In-process message bus.
///
/// Producers [`send`](Self::send) named messages; every handler registered for the name
/// runs synchronously in registration order, then every task waiting on the name is
/// resumed once with the same payload. Cloning gives another handle to the same bus.
///
/// ```
/// use herald_messaging::{payload, MessageBus};
///
/// let bus = MessageBus::new();
/// bus.on_message("Ping", |args| {
///     println!("ping with {} args", args.len());
///     Ok(())
/// })?;
///
/// let report = bus.send("Ping", payload!["hello"])?;
/// assert_eq!(report.handlers_run, 1);
/// # Ok::<(), herald_messaging::MessageError>(())
/// ```
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<Shared>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Registry::new(),
                wait_set: Arc::new(WaitSet::new()),
                timeouts: Arc::new(TimeoutScheduler::new()),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<(), MessageError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(MessageError::BusClosed);
        }
        Ok(())
    }

    /// Register a handler to run after every handler already registered for `key`.
    ///
    /// Handlers run on the sender's thread and must not wait for messages.
    pub fn on_message<K, F>(&self, key: K, handler: F) -> Result<HandlerHandle, MessageError>
    where
        K: Into<MessageKey>,
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(key.into(), None, handler)
    }

    /// Like [`on_message`](Self::on_message), with a label used in logs and failure reports
    pub fn on_message_labeled<K, F>(
        &self,
        key: K,
        label: impl Into<String>,
        handler: F,
    ) -> Result<HandlerHandle, MessageError>
    where
        K: Into<MessageKey>,
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(key.into(), Some(label.into()), handler)
    }

    fn register<F>(
        &self,
        key: MessageKey,
        label: Option<String>,
        handler: F,
    ) -> Result<HandlerHandle, MessageError>
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        key.validate()?;
        self.ensure_open()?;

        let handle = self.shared.registry.register(key, label, Arc::new(handler))?;
        debug!(
            target: "messaging",
            "Registered handler #{} for '{}'",
            handle.sequence(),
            handle.key()
        );
        Ok(handle)
    }

    /// Remove every handler for `key`. Waiters on `key` are not affected.
    pub fn clear_message(&self, key: impl Into<MessageKey>) -> Result<usize, MessageError> {
        let key = key.into();
        key.validate()?;
        self.ensure_open()?;

        let removed = self.shared.registry.clear(&key);
        debug!(target: "messaging", "Cleared {} handler(s) for '{}'", removed, key);
        Ok(removed)
    }

    /// Run the handlers for `key` and wake everything waiting on it.
    ///
    /// Returns once all handlers have run and all waiters have been resumed. Handler
    /// failures are logged and listed in the report; they never abort the send.
    pub fn send(
        &self,
        key: impl Into<MessageKey>,
        payload: impl Into<Payload>,
    ) -> Result<SendReport, MessageError> {
        let key = key.into();
        key.validate()?;
        self.ensure_open()?;

        Ok(dispatch::dispatch(&self.shared, key, payload.into()))
    }

    /// Register a waiter for the next send of `key` and return a future for its outcome.
    ///
    /// The waiter is live once this returns, so a send issued afterwards is guaranteed to
    /// resolve it. Sends that happened earlier are not replayed. A finite timeout needs a
    /// tokio runtime.
    pub fn enqueue_wait(
        &self,
        key: impl Into<MessageKey>,
        timeout: impl Into<Timeout>,
    ) -> Result<PendingWait, MessageError> {
        let key = key.into();
        key.validate()?;
        self.ensure_open()?;

        if dispatch::refuse_if_in_handler() {
            warn!(target: "messaging", "Handler tried to wait on '{}' during dispatch", key);
            return Err(MessageError::HandlerSuspension { key });
        }

        let timeout: Timeout = timeout.into();
        let timer = match timeout.duration() {
            Some(duration) => {
                let runtime = Handle::try_current().map_err(|_| MessageError::NoRuntime)?;
                // A deadline too far out to represent is the same as no deadline.
                Instant::now()
                    .checked_add(duration)
                    .map(|deadline| (runtime, deadline))
            }
            None => None,
        };

        let deadline = timer.as_ref().map(|(_, deadline)| *deadline);
        let (id, receiver) = self.shared.wait_set.enqueue(key.clone(), deadline)?;
        if let Some((runtime, deadline)) = timer {
            self.shared
                .timeouts
                .arm(&runtime, id, deadline, Arc::downgrade(&self.shared.wait_set));
        }

        debug!(target: "messaging", "Waiter {} enqueued on '{}'", id, key);
        Ok(PendingWait::new(
            id,
            key,
            receiver,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Wait for the next send of `key`.
    ///
    /// The waiter is registered when the returned future is first polled; use
    /// [`enqueue_wait`](Self::enqueue_wait) when it must be registered before some send.
    pub async fn wait(
        &self,
        key: impl Into<MessageKey>,
        timeout: impl Into<Timeout>,
    ) -> Result<WaitOutcome, MessageError> {
        self.enqueue_wait(key, timeout)?.await
    }

    pub fn handler_count(&self, key: impl Into<MessageKey>) -> usize {
        self.shared.registry.handler_count(&key.into())
    }

    pub fn pending_waiters(&self, key: impl Into<MessageKey>) -> usize {
        self.shared.wait_set.pending(&key.into())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            handler_keys: self.shared.registry.key_count(),
            handlers: self.shared.registry.total_handlers(),
            pending_waiters: self.shared.wait_set.total_pending(),
            armed_timers: self.shared.timeouts.armed(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Tear the bus down.
    ///
    /// Handlers are discarded, timers disarmed, and every pending waiter resolves to
    /// [`MessageError::BusClosed`]. Later operations on any handle fail with `BusClosed`.
    /// Returns what was discarded; a second call returns zeroes.
    pub fn shutdown(&self) -> BusStats {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return BusStats::default();
        }

        let handler_keys = self.shared.registry.key_count();
        let armed_timers = self.shared.timeouts.disarm_all();
        let released = self.shared.wait_set.close();
        let handlers = self.shared.registry.close();

        let stats = BusStats {
            handler_keys,
            handlers,
            pending_waiters: released.len(),
            armed_timers,
        };
        // Dropping the claimed waiters closes their channels.
        drop(released);

        info!(
            target: "messaging",
            "Message bus shut down: {} handler(s) discarded, {} waiter(s) released",
            stats.handlers,
            stats.pending_waiters
        );
        stats
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}
