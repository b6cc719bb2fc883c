//! Single-use, time-limited verification tokens for email, phone and
//! password reset flows.

use super::clock::Clock;
use super::error::ServiceError;
use super::jwt::generate_opaque_token;
use super::metrics;
use super::rate_limiter::RateLimiter;
use super::store::{bounded, VerificationTokenStore};
use crate::models::{TokenPurpose, VerificationToken};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque tokens are 43 characters; anything far longer is not ours.
const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct VerificationSettings {
    pub ttl: Duration,
    pub rate_limit: u32,
    pub rate_window_seconds: u64,
}

#[derive(Clone)]
pub struct VerificationTokenService {
    store: Arc<dyn VerificationTokenStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    settings: VerificationSettings,
    timeout: std::time::Duration,
}

impl VerificationTokenService {
    pub fn new(
        store: Arc<dyn VerificationTokenStore>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        settings: VerificationSettings,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            limiter,
            clock,
            settings,
            timeout,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl
    }

    /// Issue a token for `subject_id`. The rate limit is checked first; when
    /// it rejects, nothing is persisted.
    pub async fn create_verification_token(
        &self,
        subject_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<String, ServiceError> {
        self.limiter
            .enforce(
                "verification",
                &format!("verification:{}:{}", subject_id, purpose),
                self.settings.rate_limit,
                self.settings.rate_window_seconds,
            )
            .await?;

        let token = generate_opaque_token();
        let record = VerificationToken::new(
            subject_id,
            purpose,
            VerificationToken::hash_token(&token),
            self.settings.ttl,
            self.clock.now(),
        );
        bounded(self.timeout, self.store.insert_verification_token(&record)).await?;

        tracing::info!(subject_id = %subject_id, purpose = %purpose, "Verification token issued");
        Ok(token)
    }

    /// Redeem a token for `purpose`. Unknown, expired, already used and
    /// wrong-purpose tokens all fail the same way.
    pub async fn validate_and_consume(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Uuid, ServiceError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(ServiceError::InvalidOrExpired);
        }

        let consumed = bounded(
            self.timeout,
            self.store.consume_verification_token(
                &VerificationToken::hash_token(token),
                purpose,
                self.clock.now(),
            ),
        )
        .await?;

        match consumed {
            Some(subject_id) => {
                metrics::record_token_consumed(purpose.as_str());
                tracing::info!(subject_id = %subject_id, purpose = %purpose, "Verification token consumed");
                Ok(subject_id)
            }
            None => {
                tracing::warn!(purpose = %purpose, "Verification token rejected");
                Err(ServiceError::InvalidOrExpired)
            }
        }
    }

    /// Housekeeping only; expiry is always checked at redemption time.
    pub async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, ServiceError> {
        bounded(self.timeout, self.store.purge_verification_tokens(before)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::MockClock;
    use crate::services::memory::MemoryStore;

    fn service(clock: &MockClock) -> (VerificationTokenService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let timeout = std::time::Duration::from_secs(2);
        let limiter = RateLimiter::new(store.clone(), Arc::new(clock.clone()), timeout);
        let service = VerificationTokenService::new(
            store.clone(),
            limiter,
            Arc::new(clock.clone()),
            VerificationSettings {
                ttl: Duration::minutes(30),
                rate_limit: 5,
                rate_window_seconds: 3600,
            },
            timeout,
        );
        (service, store)
    }

    #[tokio::test]
    async fn token_is_redeemable_once() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let (service, _) = service(&clock);
        let subject = Uuid::new_v4();

        let token = service
            .create_verification_token(subject, TokenPurpose::Email)
            .await?;
        assert_eq!(
            service.validate_and_consume(&token, TokenPurpose::Email).await?,
            subject
        );
        assert!(matches!(
            service.validate_and_consume(&token, TokenPurpose::Email).await,
            Err(ServiceError::InvalidOrExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_purpose_does_not_consume() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let (service, _) = service(&clock);
        let token = service
            .create_verification_token(Uuid::new_v4(), TokenPurpose::PasswordReset)
            .await?;

        assert!(matches!(
            service.validate_and_consume(&token, TokenPurpose::Email).await,
            Err(ServiceError::InvalidOrExpired)
        ));
        assert!(service
            .validate_and_consume(&token, TokenPurpose::PasswordReset)
            .await
            .is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn expired_unused_token_fails() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let (service, _) = service(&clock);
        let token = service
            .create_verification_token(Uuid::new_v4(), TokenPurpose::Phone)
            .await?;

        clock.advance(Duration::minutes(30));
        assert!(matches!(
            service.validate_and_consume(&token, TokenPurpose::Phone).await,
            Err(ServiceError::InvalidOrExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_limited_and_not_stored() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let (service, store) = service(&clock);
        let subject = Uuid::new_v4();

        for _ in 0..5 {
            service
                .create_verification_token(subject, TokenPurpose::Email)
                .await?;
        }
        assert!(matches!(
            service
                .create_verification_token(subject, TokenPurpose::Email)
                .await,
            Err(ServiceError::RateLimited { .. })
        ));
        assert_eq!(store.verification_token_count(), 5);

        // Other purposes have their own budget.
        service
            .create_verification_token(subject, TokenPurpose::Phone)
            .await?;
        Ok(())
    }
}
