use super::event::ChangeEvent;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Fixed-capacity FIFO hand-off between the watch adapter and the workers
///
/// The producer side never blocks: a publish against a full or closed queue
/// is a drop, counted and logged, and the caller moves on. The cache is the
/// source of truth, so a dropped event is a missed notification, never lost
/// state. Closing is one-way; after `close` every publish fails and workers
/// drain whatever is still buffered.
#[derive(Debug)]
pub struct EventQueue<T> {
    tx: Mutex<Option<mpsc::Sender<ChangeEvent<T>>>>,
    dropped: AtomicU64,
    capacity: usize,
}

impl<T> EventQueue<T> {
    /// Create a queue and the receiver the worker pool will drain
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChangeEvent<T>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
                dropped: AtomicU64::new(0),
                capacity,
            },
            rx,
        )
    }

    /// Attempt to enqueue without blocking
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// already closed.
    pub fn try_publish(&self, event: ChangeEvent<T>) -> bool {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(key = %event.key, kind = ?event.kind, "event queue closed, dropping event");
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %event.key,
                    kind = ?event.kind,
                    capacity = self.capacity,
                    "event queue full, dropping event"
                );
                false
            }
        }
    }

    /// Close the producer side; idempotent
    pub fn close(&self) {
        let mut guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Events dropped so far because the queue was full or closed
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
