//! Cache subsystem configuration.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_ENTITY_TTL_SECS: u64 = 300;
const DEFAULT_OP_TIMEOUT_MS: u64 = 200;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Cache behavior knobs, passed in as plain values by the caller.
///
/// `op_timeout` bounds every cache operation issued from the request path so
/// a slow backend cannot stall request latency; the sync worker runs on its
/// own schedule and is not subject to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache backend. When false, callers wire in `NoOpCache`.
    pub enabled: bool,
    /// TTL for cached entity snapshots, in seconds.
    pub entity_ttl_secs: u64,
    /// Per-operation deadline for request-path cache calls, in milliseconds.
    pub op_timeout_ms: u64,
    /// Counter sync worker period, in seconds.
    pub sync_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_ttl_secs: DEFAULT_ENTITY_TTL_SECS,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}
