use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of pipeline health
///
/// Computed on demand from live state; never mutated in place. `cache_size`
/// is counted at call time, not cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub cache_size: usize,
    pub worker_count: usize,
    pub dropped_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
