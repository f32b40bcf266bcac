//! Request-path counter recording.
//!
//! Handlers bump views/likes here instead of writing to the durable store;
//! the sync worker reconciles the buffered deltas later. Every call is
//! fail-soft: a cache fault or deadline overrun drops the event, reports it,
//! and never surfaces to the caller.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::timeout;
use tracing::warn;

use super::config::CacheConfig;
use super::keys::{self, CounterKind};
use super::store::Cache;

const METRIC_COUNTER_DROPPED: &str = "taccuino_counter_record_dropped_total";

/// Counter deltas still buffered in the cache for one note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub views: i64,
    pub likes: i64,
}

/// Write-behind counter recorder over the shared cache.
pub struct Counters {
    cache: Arc<dyn Cache>,
    op_timeout: Duration,
}

impl Counters {
    pub fn new(cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            op_timeout: config.op_timeout(),
        }
    }

    pub async fn record_view(&self, note_id: i64) {
        self.bump(note_id, CounterKind::Views, 1).await;
    }

    pub async fn record_like(&self, note_id: i64) {
        self.bump(note_id, CounterKind::Likes, 1).await;
    }

    /// Undo a like before it was reconciled; the delta may go negative,
    /// which the durable relative update absorbs.
    pub async fn unrecord_like(&self, note_id: i64) {
        self.bump(note_id, CounterKind::Likes, -1).await;
    }

    /// Deltas currently pending for display on top of the durable values.
    ///
    /// Faults read as zero: the caller falls back to durable-only counts.
    pub async fn pending(&self, note_id: i64) -> PendingCounts {
        PendingCounts {
            views: self.read(note_id, CounterKind::Views).await,
            likes: self.read(note_id, CounterKind::Likes).await,
        }
    }

    async fn bump(&self, note_id: i64, kind: CounterKind, delta: i64) {
        let key = keys::note_counter(note_id, kind);
        match timeout(self.op_timeout, self.cache.increment(&key, delta)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(
                    note_id,
                    counter = kind.as_str(),
                    error = %err,
                    "dropping counter event after cache fault"
                );
                counter!(METRIC_COUNTER_DROPPED, "counter" => kind.as_str()).increment(1);
            }
            Err(_) => {
                warn!(
                    note_id,
                    counter = kind.as_str(),
                    "dropping counter event after cache deadline"
                );
                counter!(METRIC_COUNTER_DROPPED, "counter" => kind.as_str()).increment(1);
            }
        }
    }

    async fn read(&self, note_id: i64, kind: CounterKind) -> i64 {
        let key = keys::note_counter(note_id, kind);
        match timeout(self.op_timeout, self.cache.get_integer(&key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(note_id, counter = kind.as_str(), error = %err, "pending count read failed");
                0
            }
            Err(_) => {
                warn!(note_id, counter = kind.as_str(), "pending count read timed out");
                0
            }
        }
    }
}
