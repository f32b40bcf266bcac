//! Write-behind counter reconciliation.
//!
//! A single long-lived task periodically drains the dirty-id set and applies
//! buffered counter deltas to the durable store with relative updates. One
//! note's failure never blocks the batch: its deltas go back into the cache
//! and the note is poppable as dirty again on a later cycle.
//!
//! Between a counter's get-and-clear and the transaction commit the delta
//! exists in neither store; that window lasts only as long as the per-note
//! transaction and is the accepted consistency risk of this design. A cache
//! backend losing data before a cycle runs is likewise an accepted, bounded
//! risk of buffering counters in a non-durable store.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::application::repos::CounterStore;

use super::config::CacheConfig;
use super::keys::{self, CounterKind};
use super::store::Cache;

const METRIC_SYNC_CYCLES: &str = "taccuino_counter_sync_cycles_total";
const METRIC_SYNC_APPLIED: &str = "taccuino_counter_sync_applied_total";
const METRIC_SYNC_REQUEUED: &str = "taccuino_counter_sync_requeued_total";
const METRIC_SYNC_CYCLE_MS: &str = "taccuino_counter_sync_cycle_ms";

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Ids taken from the dirty set.
    pub drained: usize,
    /// Notes whose deltas were durably applied.
    pub applied: usize,
    /// Notes deferred to a later cycle after a fault.
    pub requeued: usize,
}

enum NoteSync {
    Applied,
    Clean,
    Requeued,
}

/// Periodic reconciler draining cache counters into the durable store.
pub struct CounterSyncWorker {
    cache: Arc<dyn Cache>,
    store: Arc<dyn CounterStore>,
    interval: Duration,
}

impl CounterSyncWorker {
    pub fn new(cache: Arc<dyn Cache>, store: Arc<dyn CounterStore>, config: &CacheConfig) -> Self {
        Self {
            cache,
            store,
            interval: config.sync_interval(),
        }
    }

    /// Start the background task. Cycles never overlap because there is
    /// exactly one task; a tick that fires while a cycle is still running
    /// waits behind it.
    pub fn spawn(self) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick completes immediately
            info!(
                interval_secs = self.interval.as_secs(),
                "counter sync worker started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("counter sync worker stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }
        });
        SyncHandle { shutdown_tx, task }
    }

    /// One full drain/reconcile pass.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started_at = Instant::now();
        let mut outcome = CycleOutcome::default();

        let ids = match self.cache.pop_dirty_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "counter sync: failed to pop dirty ids");
                return outcome;
            }
        };
        if ids.is_empty() {
            return outcome;
        }
        outcome.drained = ids.len();

        for note_id in ids {
            match self.sync_note(note_id).await {
                NoteSync::Applied => outcome.applied += 1,
                NoteSync::Clean => {}
                NoteSync::Requeued => outcome.requeued += 1,
            }
        }

        info!(
            drained = outcome.drained,
            applied = outcome.applied,
            requeued = outcome.requeued,
            "counter sync cycle complete"
        );
        counter!(METRIC_SYNC_CYCLES).increment(1);
        counter!(METRIC_SYNC_APPLIED).increment(outcome.applied as u64);
        counter!(METRIC_SYNC_REQUEUED).increment(outcome.requeued as u64);
        histogram!(METRIC_SYNC_CYCLE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        outcome
    }

    async fn sync_note(&self, note_id: i64) -> NoteSync {
        let views = match self.cache.get_and_clear(&keys::note_views(note_id)).await {
            Ok(views) => views,
            Err(err) => {
                warn!(note_id, error = %err, "counter sync: views read failed, re-marking dirty");
                // Increment-by-zero recreates the dirty marking without
                // altering whatever is still in the counter.
                let _ = self.cache.increment(&keys::note_views(note_id), 0).await;
                return NoteSync::Requeued;
            }
        };

        let likes = match self.cache.get_and_clear(&keys::note_likes(note_id)).await {
            Ok(likes) => likes,
            Err(err) => {
                warn!(note_id, error = %err, "counter sync: likes read failed, re-marking dirty");
                // The views delta was already taken; put it back so nothing
                // is lost. The increment re-marks the note dirty either way.
                self.restore(note_id, CounterKind::Views, views).await;
                if views == 0 {
                    let _ = self.cache.increment(&keys::note_views(note_id), 0).await;
                }
                return NoteSync::Requeued;
            }
        };

        if views == 0 && likes == 0 {
            return NoteSync::Clean;
        }

        match self.store.apply_counter_deltas(note_id, views, likes).await {
            Ok(()) => NoteSync::Applied,
            Err(err) => {
                warn!(
                    note_id,
                    views,
                    likes,
                    error = %err,
                    "counter sync: durable update failed, restoring deltas to cache"
                );
                self.restore(note_id, CounterKind::Views, views).await;
                self.restore(note_id, CounterKind::Likes, likes).await;
                NoteSync::Requeued
            }
        }
    }

    /// Add back exactly the delta that was taken, never overwriting: a
    /// request may have incremented the recreated counter in the meantime.
    async fn restore(&self, note_id: i64, kind: CounterKind, delta: i64) {
        if delta == 0 {
            return;
        }
        let key = keys::note_counter(note_id, kind);
        if let Err(err) = self.cache.increment(&key, delta).await {
            error!(
                note_id,
                counter = kind.as_str(),
                delta,
                error = %err,
                "counter sync: failed to restore delta, it is lost"
            );
        }
    }
}

/// Control handle for a spawned sync worker.
///
/// Dropping the handle also stops the worker; `shutdown` stops it and waits
/// until the in-flight cycle, if any, has finished.
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
