use super::event::{ChangeEvent, EventKind, ObjectKey};
use super::queue::EventQueue;
use super::store::ResourceStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A change observed on the remote collection
#[derive(Debug, Clone)]
pub enum WatchNotification<T> {
    Added { key: ObjectKey, object: T },
    Updated { key: ObjectKey, object: T },
    Deleted { key: ObjectKey },
    /// Authoritative full relist of the collection
    Resynced(Vec<(ObjectKey, T)>),
}

/// Subscription primitive supplied by a collaborator
///
/// The source owns the transport: reconnection and backoff of the underlying
/// stream happen behind `subscribe`, and the returned channel stays open
/// across retries. `has_synced` flips to true once the first full listing has
/// been delivered.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    type Object: Clone + Send + Sync + 'static;

    /// Open the notification stream for a namespace
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be established at all;
    /// transient stream failures are retried internally instead.
    async fn subscribe(
        &self,
        namespace: &str,
    ) -> Result<mpsc::Receiver<WatchNotification<Self::Object>>>;

    fn has_synced(&self) -> bool;
}

/// Applies watch notifications to the store and fans them out as events
///
/// The two effects of a notification are deliberately not transactional: the
/// store mutation always lands and is visible to readers before the event is
/// offered to the queue, and a full queue drops the event without touching
/// the store.
pub(crate) struct WatchAdapter<T> {
    store: ResourceStore<T>,
    queue: Arc<EventQueue<T>>,
}

impl<T: Clone + Send + Sync + 'static> WatchAdapter<T> {
    pub(crate) fn new(store: ResourceStore<T>, queue: Arc<EventQueue<T>>) -> Self {
        Self { store, queue }
    }

    /// Drive the notification stream until it ends or cancellation fires
    pub(crate) async fn run(
        self,
        mut notifications: mpsc::Receiver<WatchNotification<T>>,
        resync_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut resync = tokio::time::interval(resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        resync.tick().await; // first tick completes immediately

        info!(resync_secs = resync_interval.as_secs(), "watch adapter started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("watch adapter cancelled");
                    break;
                }
                _ = resync.tick() => {
                    self.redeliver_cached().await;
                }
                notification = notifications.recv() => {
                    match notification {
                        Some(notification) => self.apply(notification).await,
                        None => {
                            info!("watch stream ended, adapter stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Apply one notification: mutate the store, then offer the event
    async fn apply(&self, notification: WatchNotification<T>) {
        match notification {
            WatchNotification::Added { key, object } => {
                self.store.insert(&key, object.clone()).await;
                debug!(key = %key, "object added");
                self.queue
                    .try_publish(ChangeEvent::new(EventKind::Add, key, Some(object)));
            }
            WatchNotification::Updated { key, object } => {
                self.store.insert(&key, object.clone()).await;
                debug!(key = %key, "object updated");
                self.queue
                    .try_publish(ChangeEvent::new(EventKind::Update, key, Some(object)));
            }
            WatchNotification::Deleted { key } => {
                self.store.remove(&key).await;
                debug!(key = %key, "object deleted");
                self.queue
                    .try_publish(ChangeEvent::new(EventKind::Delete, key, None));
            }
            WatchNotification::Resynced(objects) => {
                info!(count = objects.len(), "full relist received");
                self.store.replace_all(objects.clone()).await;
                for (key, object) in objects {
                    self.queue
                        .try_publish(ChangeEvent::new(EventKind::Update, key, Some(object)));
                }
            }
        }
    }

    /// Re-deliver every cached object as a synthetic update
    ///
    /// Gives consumers that missed dropped events a chance to catch up; the
    /// same non-blocking drop policy applies.
    async fn redeliver_cached(&self) {
        let snapshot = self.store.list_keyed().await;
        debug!(count = snapshot.len(), "periodic resync re-delivery");
        for (key, object) in snapshot {
            self.queue
                .try_publish(ChangeEvent::new(EventKind::Update, key, Some(object)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn adapter(capacity: usize) -> (WatchAdapter<u32>, Arc<EventQueue<u32>>, mpsc::Receiver<ChangeEvent<u32>>) {
        let store = ResourceStore::new(16);
        let (queue, rx) = EventQueue::new(capacity);
        let queue = Arc::new(queue);
        (WatchAdapter::new(store, Arc::clone(&queue)), queue, rx)
    }

    #[tokio::test]
    async fn add_mutates_store_then_publishes() {
        let (adapter, _queue, mut rx) = adapter(4);

        adapter
            .apply(WatchNotification::Added {
                key: key("app"),
                object: 7,
            })
            .await;

        assert_eq!(adapter.store.get(&key("app")).await, Some(7));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Add);
        assert_eq!(event.object, Some(7));
    }

    #[tokio::test]
    async fn dropped_event_never_rolls_back_the_store() {
        let (adapter, queue, _rx) = adapter(1);

        adapter
            .apply(WatchNotification::Added { key: key("a"), object: 1 })
            .await;
        adapter
            .apply(WatchNotification::Added { key: key("b"), object: 2 })
            .await;

        // Second event dropped, both mutations applied.
        assert_eq!(queue.dropped_events(), 1);
        assert_eq!(adapter.store.get(&key("a")).await, Some(1));
        assert_eq!(adapter.store.get(&key("b")).await, Some(2));
    }

    #[tokio::test]
    async fn resync_notification_reconciles_and_redelivers() {
        let (adapter, _queue, mut rx) = adapter(8);

        adapter
            .apply(WatchNotification::Added { key: key("stale"), object: 1 })
            .await;
        let _ = rx.recv().await;

        adapter
            .apply(WatchNotification::Resynced(vec![(key("fresh"), 2)]))
            .await;

        assert_eq!(adapter.store.get(&key("stale")).await, None);
        assert_eq!(adapter.store.get(&key("fresh")).await, Some(2));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.key, key("fresh"));
    }

    #[tokio::test]
    async fn delete_for_unknown_key_still_emits_event() {
        let (adapter, _queue, mut rx) = adapter(4);

        adapter
            .apply(WatchNotification::Deleted { key: key("ghost") })
            .await;

        assert!(adapter.store.is_empty().await);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert!(event.object.is_none());
    }
}
