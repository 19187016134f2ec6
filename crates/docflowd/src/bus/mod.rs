//! Typed publish/subscribe hub for state events.
//!
//! Producers (state manager, command bridge, run log) emit [`EventPayload`]s;
//! consumers register handlers per [`EventKind`] or receive every event on a
//! broadcast channel.
//!
//! # Dispatch
//!
//! `emit` is synchronous: it timestamps the event, appends it to the history
//! ring (capacity [`HISTORY_CAPACITY`]), publishes it on the broadcast
//! channel and then calls the kind's handlers in subscription order before
//! returning. There is no re-entrancy guard. A handler that emits runs the
//! nested emit to completion before the outer dispatch continues, so event
//! order is call-stack order. The handler list is snapshotted before
//! dispatch and no lock is held while handlers run.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned locks are recovered rather than propagated

mod events;

pub use events::{EventKind, EventPayload, StateEvent};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use docflow_core::ThemeKind;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Number of events kept in history.
pub const HISTORY_CAPACITY: usize = 100;

/// Buffer of the async broadcast channel.
const BROADCAST_BUFFER: usize = 256;

type Handler = Arc<dyn Fn(&StateEvent) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
}

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

struct BusInner {
    handlers: Mutex<Vec<Registration>>,
    history: Mutex<VecDeque<StateEvent>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<StateEvent>,
}

impl BusInner {
    fn remove(&self, ids: &[u64]) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|r| !ids.contains(&r.id));
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Disposal capability returned by `on`/`on_any`.
///
/// Dropping a subscription does not unregister it; call [`dispose`].
///
/// [`dispose`]: Subscription::dispose
pub struct Subscription {
    bus: Weak<BusInner>,
    ids: Vec<u64>,
}

impl Subscription {
    /// Removes every handler this subscription registered, in one step.
    /// Disposing twice is a no-op.
    pub fn dispose(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.ids);
        }
        self.ids.clear();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.ids.is_empty() && self.bus.strong_count() > 0
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("ids", &self.ids).finish()
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Cheap-to-clone handle to a shared event bus.
#[derive(Clone)]
pub struct StateEventBus {
    inner: Arc<BusInner>,
}

impl StateEventBus {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_BUFFER);
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                next_id: AtomicU64::new(1),
                broadcast,
            }),
        }
    }

    /// Emits an event and dispatches it synchronously. Returns the event as
    /// recorded.
    pub fn emit(&self, payload: EventPayload) -> StateEvent {
        let event = StateEvent::now(payload);
        let kind = event.kind();

        {
            let mut history = self
                .inner
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No async subscribers is not an error.
        let _ = self.inner.broadcast.send(event.clone());

        let handlers: Vec<Handler> = {
            let handlers = self
                .inner
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            handlers
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        trace!(kind = %kind, handlers = handlers.len(), "Dispatching event");
        for handler in handlers {
            handler(&event);
        }

        event
    }

    /// Registers `handler` for one kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.register(&[kind], Arc::new(handler))
    }

    /// Registers `handler` for a kind given by name, failing on unknown names.
    ///
    /// # Errors
    ///
    /// Returns `BusError::UnknownEventKind` if `name` is not an event kind.
    pub fn on_named<F>(&self, name: &str, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let kind =
            EventKind::from_name(name).ok_or_else(|| BusError::UnknownEventKind(name.to_string()))?;
        Ok(self.on(kind, handler))
    }

    /// Registers `handler` for every kind.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.register(&EventKind::ALL, Arc::new(handler))
    }

    fn register(&self, kinds: &[EventKind], handler: Handler) -> Subscription {
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<u64> = kinds
            .iter()
            .map(|&kind| {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                handlers.push(Registration {
                    id,
                    kind,
                    handler: Arc::clone(&handler),
                });
                id
            })
            .collect();

        Subscription {
            bus: Arc::downgrade(&self.inner),
            ids,
        }
    }

    /// Returns the most recent `limit` events (all when `None`), optionally
    /// filtered by kind, oldest first.
    pub fn get_history(&self, kind: Option<EventKind>, limit: Option<usize>) -> Vec<StateEvent> {
        let history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&StateEvent> = history
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .collect();
        let skip = limit.map_or(0, |n| matching.len().saturating_sub(n));
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Receives every emitted event asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.broadcast.subscribe()
    }

    /// Number of live handler registrations.
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Re-emits every change of the host theme signal as THEME_CHANGED.
    ///
    /// The task ends when the sender side of the signal is dropped.
    pub fn attach_theme_signal(&self, mut signal: watch::Receiver<ThemeKind>) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            while signal.changed().await.is_ok() {
                let theme = *signal.borrow_and_update();
                debug!(theme = %theme, "Host theme changed");
                bus.emit(EventPayload::ThemeChanged { theme });
            }
            debug!("Theme signal closed");
        })
    }
}

impl Default for StateEventBus {
    fn default() -> Self {
        Self::new()
    }
}
