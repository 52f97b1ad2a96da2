/**
 * Configuration for the watch pipeline
 */
use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default resync interval when none is configured
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Minimum accepted resync interval
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum accepted resync interval
pub const MAX_RESYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default number of event workers
pub const DEFAULT_WORKERS: usize = 2;

/// Default event queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default cache size hint (pre-allocated map capacity, not a limit)
pub const DEFAULT_CACHE_SIZE_HINT: usize = 1000;

/// Interval at which `start` polls the watch source for initial sync
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pipeline configuration
///
/// Zero-valued fields are filled in by `set_defaults`; `validate` rejects
/// anything outside the accepted ranges. Validation runs after defaulting, so
/// a zeroed struct is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Namespace whose resources are mirrored
    pub namespace: String,
    /// Interval between synthetic full re-deliveries of the cache
    #[serde(with = "duration_secs")]
    pub resync_interval: Duration,
    /// Number of concurrent event workers
    pub workers: usize,
    /// Capacity hint for the resource cache map
    pub max_cache_size: usize,
    /// Bounded event queue capacity; enqueues beyond this are dropped
    pub event_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            resync_interval: Duration::ZERO,
            workers: 0,
            max_cache_size: 0,
            event_queue_capacity: 0,
        }
    }
}

impl PipelineConfig {
    /// Fill zero-valued fields with their defaults
    pub fn set_defaults(&mut self) {
        if self.resync_interval.is_zero() {
            self.resync_interval = DEFAULT_RESYNC_INTERVAL;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.max_cache_size == 0 {
            self.max_cache_size = DEFAULT_CACHE_SIZE_HINT;
        }
        if self.event_queue_capacity == 0 {
            self.event_queue_capacity = DEFAULT_QUEUE_CAPACITY;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::validation("namespace", "cannot be empty"));
        }
        if self.resync_interval < MIN_RESYNC_INTERVAL || self.resync_interval > MAX_RESYNC_INTERVAL
        {
            return Err(Error::validation(
                "resyncInterval",
                "must be between 1s and 30m",
            ));
        }
        if self.workers == 0 {
            return Err(Error::validation("workers", "must be positive"));
        }
        if self.max_cache_size == 0 {
            return Err(Error::validation("maxCacheSize", "must be positive"));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::validation("eventQueueCapacity", "must be positive"));
        }
        Ok(())
    }
}

/// Deserialize durations given as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

const _: () = {
    assert!(DEFAULT_WORKERS > 0, "DEFAULT_WORKERS must be greater than 0");
    assert!(
        DEFAULT_QUEUE_CAPACITY > 0,
        "DEFAULT_QUEUE_CAPACITY must be greater than 0"
    );
    assert!(
        DEFAULT_CACHE_SIZE_HINT > 0,
        "DEFAULT_CACHE_SIZE_HINT must be greater than 0"
    );
};
