//! HTTP middleware surfacing the cache subsystem to request handling.

pub mod rate_limit;

pub use rate_limit::{AuthUser, RateLimitGate};
