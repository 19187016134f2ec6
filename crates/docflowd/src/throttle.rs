//! Debouncing and log-stream throttling.
//!
//! [`KeyedDebouncer`] is a per-key timer arena with cancel-and-reschedule
//! semantics: scheduling a key that already has a pending timer aborts the
//! old timer, so the action fires once, one window after the latest call.
//!
//! [`LogStreamThrottler`] buffers log entries per provider and drains the
//! whole buffer one window after the latest push, delivering the entries
//! individually in arrival order.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docflow_core::{LogBuffer, LogEntry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Refresh debounce for command records.
pub const RECORD_REFRESH_WINDOW: Duration = Duration::from_millis(200);

/// Debounce for forwarding log entries to a rendering surface.
pub const LOG_STREAM_WINDOW: Duration = Duration::from_millis(50);

// ============================================================================
// KeyedDebouncer
// ============================================================================

struct TimerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

struct TimerArena<K> {
    next_generation: u64,
    slots: HashMap<K, TimerSlot>,
}

/// Per-key trailing-edge debouncer. Must be used inside a Tokio runtime.
pub struct KeyedDebouncer<K> {
    window: Duration,
    arena: Arc<Mutex<TimerArena<K>>>,
}

impl<K> KeyedDebouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arena: Arc::new(Mutex::new(TimerArena {
                next_generation: 0,
                slots: HashMap::new(),
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Runs `action` one window from now unless `key` is scheduled again
    /// first, in which case only the newer action runs.
    pub fn schedule<F>(&self, key: K, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = arena.next_generation;
        arena.next_generation = arena.next_generation.wrapping_add(1);

        if let Some(previous) = arena.slots.remove(&key) {
            previous.handle.abort();
        }

        let window = self.window;
        let timers = Arc::clone(&self.arena);
        let fire_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut arena = timers.lock().unwrap_or_else(PoisonError::into_inner);
                match arena.slots.get(&fire_key) {
                    Some(slot) if slot.generation == generation => {
                        arena.slots.remove(&fire_key);
                    }
                    // Superseded between wake-up and lock.
                    _ => return,
                }
            }
            action();
        });

        arena.slots.insert(key, TimerSlot { generation, handle });
    }

    /// Cancels a pending timer. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        match arena.slots.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in arena.slots.drain() {
            slot.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .contains_key(key)
    }

    pub fn pending(&self) -> usize {
        self.arena
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }
}

impl<K> Drop for KeyedDebouncer<K> {
    fn drop(&mut self) {
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in arena.slots.drain() {
            slot.handle.abort();
        }
    }
}

// ============================================================================
// LogStreamThrottler
// ============================================================================

/// One log entry delivered to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDelivery {
    pub provider: String,
    pub entry: LogEntry,
}

type Buffers = Arc<Mutex<HashMap<String, LogBuffer>>>;

/// Coalesces log entries per provider into debounced flushes.
///
/// Each provider's buffer holds at most [`docflow_core::MAX_LOG_ENTRIES`]
/// entries; older entries are dropped when a burst outruns the flush.
pub struct LogStreamThrottler {
    buffers: Buffers,
    debouncer: KeyedDebouncer<String>,
    sink: mpsc::Sender<LogDelivery>,
}

impl LogStreamThrottler {
    /// Creates a throttler that delivers flushed entries to `sink`.
    pub fn new(window: Duration, sink: mpsc::Sender<LogDelivery>) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            debouncer: KeyedDebouncer::new(window),
            sink,
        }
    }

    /// Buffers `entry` for `provider` and (re)schedules that provider's flush.
    pub fn push(&self, provider: &str, entry: LogEntry) {
        {
            let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
            buffers.entry(provider.to_string()).or_default().push(entry);
        }

        let buffers = Arc::clone(&self.buffers);
        let sink = self.sink.clone();
        let key = provider.to_string();
        self.debouncer.schedule(provider.to_string(), move || {
            flush(&buffers, &sink, &key);
        });
    }

    /// Drains `provider`'s buffer immediately, cancelling its pending flush.
    pub fn flush_now(&self, provider: &str) -> usize {
        self.debouncer.cancel(&provider.to_string());
        flush(&self.buffers, &self.sink, provider)
    }

    /// Number of entries waiting for `provider`.
    pub fn buffered(&self, provider: &str) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .map_or(0, LogBuffer::len)
    }
}

fn flush(buffers: &Buffers, sink: &mpsc::Sender<LogDelivery>, provider: &str) -> usize {
    let drained = {
        let mut buffers = buffers.lock().unwrap_or_else(PoisonError::into_inner);
        match buffers.remove(provider) {
            Some(mut buffer) => buffer.drain(),
            None => return 0,
        }
    };

    let total = drained.len();
    let mut delivered = 0;
    for entry in drained {
        let delivery = LogDelivery {
            provider: provider.to_string(),
            entry,
        };
        match sink.try_send(delivery) {
            Ok(()) => delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(provider, "Log sink full, dropping entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(provider, "Log sink closed");
                break;
            }
        }
    }
    trace!(provider, total, delivered, "Flushed log buffer");
    delivered
}
