use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind of mutation observed on the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// Identity of a namespaced resource, rendered as `"namespace/name"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `"namespace/name"` cache key back into its parts
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (namespace, name) = key.split_once('/')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single observed mutation, created at the moment the cache was updated
///
/// Immutable once constructed; delivered to exactly one worker or dropped.
/// `object` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct ChangeEvent<T> {
    pub kind: EventKind,
    pub key: ObjectKey,
    pub observed_at: DateTime<Utc>,
    pub object: Option<T>,
}

impl<T> ChangeEvent<T> {
    #[must_use]
    pub fn new(kind: EventKind, key: ObjectKey, object: Option<T>) -> Self {
        Self {
            kind,
            key,
            observed_at: Utc::now(),
            object,
        }
    }
}
