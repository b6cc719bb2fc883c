//! Fixed-window, per-identity rate limiting backed by a [`RateLimitStore`].

use super::clock::Clock;
use super::error::ServiceError;
use super::metrics;
use super::store::{bounded, RateLimitStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: u32 },
    Limited { retry_after: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// True when the request fits in the current window. A rejected request
    /// leaves the counter untouched.
    pub async fn allow(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool, ServiceError> {
        Ok(matches!(
            self.check(key, limit, window_seconds).await?,
            RateDecision::Allowed { .. }
        ))
    }

    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<RateDecision, ServiceError> {
        let now = self.clock.now();
        let start = window_start(now, window_seconds)?;

        let counted = bounded(
            self.timeout,
            self.store.increment_within_limit(key, start, limit),
        )
        .await?;

        Ok(match counted {
            Some(count) => RateDecision::Allowed { count },
            None => {
                let window_end = start.timestamp() + window_seconds.max(1) as i64;
                let retry_after = (window_end - now.timestamp()).max(1) as u64;
                RateDecision::Limited { retry_after }
            }
        })
    }

    /// Like [`Self::check`] but turns a rejection into `RateLimited` and
    /// records it under `scope`.
    pub async fn enforce(
        &self,
        scope: &'static str,
        key: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<(), ServiceError> {
        match self.check(key, limit, window_seconds).await? {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after } => {
                metrics::record_rate_limited(scope);
                tracing::warn!(scope, retry_after, "Rate limit exceeded");
                Err(ServiceError::RateLimited { retry_after })
            }
        }
    }

    /// Drop counters whose window started before `before`.
    pub async fn purge_stale(&self, before: DateTime<Utc>) -> Result<u64, ServiceError> {
        bounded(self.timeout, self.store.purge_rate_limit_counters(before)).await
    }
}

/// Start of the fixed window containing `now`: `floor(now / window) * window`.
pub fn window_start(now: DateTime<Utc>, window_seconds: u64) -> Result<DateTime<Utc>, ServiceError> {
    let window = window_seconds.max(1) as i64;
    let ts = now.timestamp();
    DateTime::<Utc>::from_timestamp(ts - ts.rem_euclid(window), 0)
        .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("timestamp out of range")))
}
