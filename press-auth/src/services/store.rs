//! Persistence seams. [`super::Database`] implements every trait on Postgres,
//! [`super::MemoryStore`] implements them in-process.

use super::error::{ServiceError, StoreError};
use crate::models::{
    Credential, PolicyRule, PolicyStats, RefreshToken, RuleFilter, SigningKey, TokenPurpose,
    VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the username or email is taken.
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError>;
    async fn find_credential_by_id(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError>;
    /// Case-insensitive.
    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credential>, StoreError>;
    /// Case-insensitive.
    async fn find_credential_by_email(&self, email: &str)
        -> Result<Option<Credential>, StoreError>;
    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn mark_email_verified(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<bool, StoreError>;
    async fn mark_phone_verified(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<bool, StoreError>;
    /// Returns false when no such credential existed.
    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn active_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError>;
    async fn all_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError>;
    async fn insert_signing_key(&self, key: &SigningKey) -> Result<(), StoreError>;
    /// Deactivates `key_id` unless it is the only active key. The count and
    /// the update are atomic with respect to other deactivations.
    async fn deactivate_signing_key(
        &self,
        key_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<KeyDeactivation, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDeactivation {
    Deactivated,
    /// Unknown or already inactive.
    NotActive,
    LastActiveKey,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    /// Revokes the live token `old_hash` and stores its successor for the same
    /// subject as one atomic unit. `None` when the old token is unknown,
    /// expired or already revoked; nothing is written in that case.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expiry_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError>;

    /// Returns the owning subject when a live token was revoked.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Deletes rows that expired or were revoked before `before`.
    async fn purge_refresh_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    async fn insert_verification_token(&self, token: &VerificationToken)
        -> Result<(), StoreError>;

    /// Marks the token used if it is unused, unexpired and of `purpose`.
    /// At most one caller ever gets `Some` for a given token.
    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn purge_verification_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increments the counter for `key` in the window starting at
    /// `window_start` unless it already reached `limit`. Returns the new count,
    /// or `None` (counter untouched) when at capacity.
    async fn increment_within_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Option<u32>, StoreError>;

    async fn purge_rate_limit_counters(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, StoreError>;
    /// Returns false when the rule already exists.
    async fn add_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError>;
    /// Returns false when the rule did not exist.
    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError>;
    async fn remove_filtered_rules(&self, filter: &RuleFilter) -> Result<u64, StoreError>;
    /// Replaces `old` with `new` atomically. False when `old` did not exist.
    async fn update_rule(&self, old: &PolicyRule, new: &PolicyRule) -> Result<bool, StoreError>;
    /// Replaces the whole rule set in one transaction.
    async fn replace_all_rules(&self, rules: &[PolicyRule]) -> Result<(), StoreError>;
    async fn rule_stats(&self) -> Result<PolicyStats, StoreError>;
}

/// Every store the service needs, as one backend.
pub trait AuthStore:
    IdentityStore + KeyStore + RefreshTokenStore + VerificationTokenStore + RateLimitStore + PolicyStore
{
}

impl<T> AuthStore for T where
    T: IdentityStore
        + KeyStore
        + RefreshTokenStore
        + VerificationTokenStore
        + RateLimitStore
        + PolicyStore
{
}

/// Runs a store call with an upper bound on its duration.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => {
            tracing::error!(timeout_ms = timeout.as_millis() as u64, "Store call timed out");
            Err(ServiceError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_times_out_slow_calls() {
        let result: Result<(), ServiceError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ServiceError::Timeout)));
    }

    #[tokio::test]
    async fn bounded_maps_store_errors() {
        let result: Result<(), ServiceError> = bounded(Duration::from_secs(1), async {
            Err(StoreError::Conflict("duplicate".into()))
        })
        .await;

        assert!(matches!(result, Err(ServiceError::Storage(StoreError::Conflict(_)))));
    }
}
