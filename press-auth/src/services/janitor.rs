//! Periodic housekeeping. Correctness never depends on it: expiry is always
//! checked when a token is redeemed.

use super::clock::Clock;
use super::error::ServiceError;
use super::jwt::TokenIssuer;
use super::policy::PolicyEnforcer;
use super::rate_limiter::RateLimiter;
use super::verification::VerificationTokenService;
use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub verification_tokens: u64,
    pub refresh_tokens: u64,
    pub rate_limit_counters: u64,
    pub retired_keys: usize,
    pub policy_reloaded: bool,
    pub failed_steps: usize,
}

impl SweepReport {
    /// A failed step counts as zero and is logged; the pass goes on.
    fn settle<T: Default>(&mut self, step: &'static str, result: Result<T, ServiceError>) -> T {
        result.unwrap_or_else(|e| {
            tracing::warn!(step, error = %e, "Janitor step failed");
            self.failed_steps += 1;
            T::default()
        })
    }
}

#[derive(Clone)]
pub struct Janitor {
    tokens: TokenIssuer,
    verification: VerificationTokenService,
    limiter: RateLimiter,
    policy: PolicyEnforcer,
    clock: Arc<dyn Clock>,
    key_grace: Duration,
    /// Counters older than this can no longer be inside any window.
    counter_retention: Duration,
}

impl Janitor {
    pub fn new(
        tokens: TokenIssuer,
        verification: VerificationTokenService,
        limiter: RateLimiter,
        policy: PolicyEnforcer,
        clock: Arc<dyn Clock>,
        key_grace: Duration,
        counter_retention: Duration,
    ) -> Self {
        Self {
            tokens,
            verification,
            limiter,
            policy,
            clock,
            key_grace,
            counter_retention,
        }
    }

    /// One pass. Also reloads the policy model so writes made by other
    /// replicas show up here. Every step runs even when an earlier one fails.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let purged = self.verification.purge_expired(now).await;
        report.verification_tokens = report.settle("verification_tokens", purged);
        let purged = self.tokens.purge_expired(now).await;
        report.refresh_tokens = report.settle("refresh_tokens", purged);
        let purged = self.limiter.purge_stale(now - self.counter_retention).await;
        report.rate_limit_counters = report.settle("rate_limit_counters", purged);
        let retired = self.tokens.keys().retire_superseded(self.key_grace).await;
        report.retired_keys = report.settle("signing_keys", retired);
        let reloaded = self.policy.load_policy().await.map(|_| true);
        report.policy_reloaded = report.settle("policy_reload", reloaded);

        report
    }

    pub fn spawn(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = self.sweep().await;
                if report.failed_steps > 0 {
                    tracing::warn!(?report, "Janitor sweep completed with failures");
                } else {
                    tracing::debug!(?report, "Janitor sweep completed");
                }
            }
        })
    }
}
