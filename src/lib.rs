//! Taccuino — the consistency core of a notes backend.
//!
//! High-frequency counters (views, likes) are buffered in a key-value cache
//! and written behind into the durable store by a periodic sync worker.
//! Entity reads go through a cache-aside decorator, and admission control
//! reuses the same cache primitive as a fixed-window rate limiter.
//!
//! The durable store, identity extraction, and HTTP surface are boundary
//! collaborators: this crate consumes them through the traits in
//! [`application::repos`] and exposes the cache contract in [`cache`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
