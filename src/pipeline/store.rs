use super::event::ObjectKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Local mirror of the remote collection, keyed by `"namespace/name"`
///
/// Written only by the watch adapter on its single notification stream; read
/// by everyone. Each entry reflects the last mutation observed for its key in
/// watch-stream order. A missing key is a normal outcome, not an error.
#[derive(Debug)]
pub struct ResourceStore<T> {
    entries: Arc<RwLock<HashMap<String, T>>>,
}

impl<T: Clone> ResourceStore<T> {
    #[must_use]
    pub fn new(capacity_hint: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(capacity_hint))),
        }
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<T> {
        let entries = self.entries.read().await;
        entries.get(&key.to_string()).cloned()
    }

    /// Snapshot of all cached objects at call time, order unspecified
    pub async fn list(&self) -> Vec<T> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }

    /// Snapshot of all cached `(key, object)` pairs at call time
    pub async fn list_keyed(&self) -> Vec<(ObjectKey, T)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter_map(|(key, obj)| Some((ObjectKey::parse(key)?, obj.clone())))
            .collect()
    }

    pub async fn insert(&self, key: &ObjectKey, object: T) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), object);
    }

    pub async fn remove(&self, key: &ObjectKey) {
        let mut entries = self.entries.write().await;
        entries.remove(&key.to_string());
    }

    /// Reconcile against an authoritative full relist
    ///
    /// Every listed entry overwrites the local copy regardless of version,
    /// and entries absent from the relist are removed, so the key set
    /// converges exactly even after a disconnect or dropped notifications.
    pub async fn replace_all(&self, objects: Vec<(ObjectKey, T)>) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.clear();
        for (key, object) in objects {
            entries.insert(key.to_string(), object);
        }
        debug!(before, after = entries.len(), "store reconciled from relist");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// Manual impl so T: Clone is not required for sharing the store itself.
impl<T> Clone for ResourceStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}
