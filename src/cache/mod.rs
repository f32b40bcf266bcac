//! Cache-backed consistency layer.
//!
//! Everything here shares one [`Cache`] handle: entity snapshots with
//! delete-only invalidation, write-behind view/like counters with a periodic
//! reconciler, and fixed-window rate limiting. The cache is an accelerator,
//! never the source of truth; when it misbehaves the rest of the service
//! keeps working against the durable store alone.

pub mod config;
pub mod counters;
pub mod keys;
pub mod limiter;
pub mod repository;
pub mod store;
pub mod sync;

pub use config::CacheConfig;
pub use counters::{Counters, PendingCounts};
pub use limiter::{Decision, RateLimitPolicy, RateLimiter, Scope};
pub use repository::CachedNotesRepo;
pub use store::{Cache, CacheError, CacheExt, MemoryCache, NoOpCache};
pub use sync::{CounterSyncWorker, CycleOutcome, SyncHandle};
