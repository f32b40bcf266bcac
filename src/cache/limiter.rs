//! Fixed-window rate limiting on the shared cache primitive.
//!
//! A window opens at the first hit for a key and never slides: the TTL is
//! set only when the counter is created, so a burst straddling the window
//! boundary can briefly see up to twice the limit. That is the documented
//! fixed-window trade-off, not a bug.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::warn;

use super::config::CacheConfig;
use super::keys;
use super::store::Cache;

const METRIC_RATE_LIMIT_DENIED: &str = "taccuino_rate_limit_denied_total";
const METRIC_RATE_LIMIT_FAIL_OPEN: &str = "taccuino_rate_limit_fail_open_total";

/// Per-action limit configuration.
///
/// A non-positive limit or window disables limiting for that action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    pub limit: i64,
    pub window_secs: i64,
}

impl RateLimitPolicy {
    pub fn enabled(&self) -> bool {
        self.limit > 0 && self.window_secs > 0
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(0) as u64)
    }
}

/// Who a request is counted against: the authenticated user when one is
/// known, otherwise the client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    User(i64),
    Ip(String),
}

impl Scope {
    fn kind(&self) -> &'static str {
        match self {
            Scope::User(_) => "uid",
            Scope::Ip(_) => "ip",
        }
    }

    fn ident(&self) -> String {
        match self {
            Scope::User(uid) => uid.to_string(),
            Scope::Ip(addr) => addr.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Admission gate built on atomic increment plus expire-on-first-hit.
///
/// Backend faults fail open: availability of the primary service wins over
/// strict enforcement, and the fault goes to the log/metrics sink instead of
/// the caller.
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    op_timeout: Duration,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            op_timeout: config.op_timeout(),
        }
    }

    pub async fn check(&self, action: &str, scope: &Scope, policy: RateLimitPolicy) -> Decision {
        if !policy.enabled() {
            return Decision::Allow;
        }

        let key = keys::rate_limit(action, scope.kind(), &scope.ident());
        let count = match timeout(self.op_timeout, self.cache.increment(&key, 1)).await {
            Ok(Ok(count)) => count,
            Ok(Err(err)) => {
                warn!(action, scope = scope.kind(), error = %err, "rate limit failing open");
                counter!(METRIC_RATE_LIMIT_FAIL_OPEN, "action" => action.to_string()).increment(1);
                return Decision::Allow;
            }
            Err(_) => {
                warn!(action, scope = scope.kind(), "rate limit check timed out, failing open");
                counter!(METRIC_RATE_LIMIT_FAIL_OPEN, "action" => action.to_string()).increment(1);
                return Decision::Allow;
            }
        };

        if count == 1 {
            // First hit in a fresh window; subsequent hits never refresh it.
            match timeout(self.op_timeout, self.cache.expire(&key, policy.window())).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(action, error = %err, "failed to open rate limit window")
                }
                Err(_) => warn!(action, "timed out opening rate limit window"),
            }
        }

        if count > policy.limit {
            counter!(METRIC_RATE_LIMIT_DENIED, "action" => action.to_string()).increment(1);
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}
