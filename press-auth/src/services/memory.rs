//! In-process implementation of every store trait, used by the dev backend
//! and by tests. Compound updates run under a single `parking_lot` mutex;
//! single-row updates rely on `DashMap` entry locks.

use super::error::StoreError;
use super::store::{
    IdentityStore, KeyDeactivation, KeyStore, PolicyStore, RateLimitStore, RefreshTokenStore,
    VerificationTokenStore,
};
use crate::models::{
    Credential, PolicyRule, PolicyStats, RefreshToken, RuleFilter, SigningKey, TokenPurpose,
    VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    credentials: Mutex<HashMap<Uuid, Credential>>,
    signing_keys: Mutex<Vec<SigningKey>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    verification_tokens: DashMap<String, VerificationToken>,
    counters: DashMap<String, (DateTime<Utc>, u32)>,
    policy_rules: Mutex<BTreeSet<PolicyRule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verification_token_count(&self) -> usize {
        self.verification_tokens.len()
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.lock().len()
    }

    pub fn rate_limit_count(&self, key: &str) -> Option<u32> {
        self.counters.get(key).map(|entry| entry.value().1)
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut credentials = self.credentials.lock();
        if credentials
            .values()
            .any(|c| same_text(&c.username, &credential.username))
        {
            return Err(StoreError::Conflict("username already taken".to_string()));
        }
        if credentials
            .values()
            .any(|c| same_text(&c.email, &credential.email))
        {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        credentials.insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn find_credential_by_id(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.lock().get(&user_id).cloned())
    }

    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials
            .lock()
            .values()
            .find(|c| same_text(&c.username, username))
            .cloned())
    }

    async fn find_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials
            .lock()
            .values()
            .find(|c| same_text(&c.email, email))
            .cloned())
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut credentials = self.credentials.lock();
        match credentials.get_mut(&user_id) {
            Some(c) => {
                c.password_hash = password_hash.to_string();
                c.updated_utc = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_email_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut credentials = self.credentials.lock();
        match credentials.get_mut(&user_id) {
            Some(c) => {
                c.email_verified_utc.get_or_insert(now);
                c.updated_utc = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_phone_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut credentials = self.credentials.lock();
        match credentials.get_mut(&user_id) {
            Some(c) => {
                c.phone_verified_utc.get_or_insert(now);
                c.updated_utc = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.credentials.lock().remove(&user_id).is_some())
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn active_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError> {
        Ok(self
            .signing_keys
            .lock()
            .iter()
            .filter(|k| k.is_active)
            .cloned()
            .collect())
    }

    async fn all_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError> {
        Ok(self.signing_keys.lock().clone())
    }

    async fn insert_signing_key(&self, key: &SigningKey) -> Result<(), StoreError> {
        let mut keys = self.signing_keys.lock();
        if keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(StoreError::Conflict(format!("signing key {} exists", key.key_id)));
        }
        keys.push(key.clone());
        Ok(())
    }

    async fn deactivate_signing_key(
        &self,
        key_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<KeyDeactivation, StoreError> {
        let mut keys = self.signing_keys.lock();
        let active = keys.iter().filter(|k| k.is_active).count();
        match keys.iter_mut().find(|k| k.key_id == key_id && k.is_active) {
            Some(_) if active <= 1 => Ok(KeyDeactivation::LastActiveKey),
            Some(key) => {
                key.is_active = false;
                key.deactivated_utc = Some(now);
                Ok(KeyDeactivation::Deactivated)
            }
            None => Ok(KeyDeactivation::NotActive),
        }
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        let mut tokens = self.refresh_tokens.lock();
        if tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("refresh token exists".to_string()));
        }
        tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expiry_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let mut tokens = self.refresh_tokens.lock();

        if tokens.contains_key(new_hash) {
            return Err(StoreError::Conflict("refresh token exists".to_string()));
        }

        let subject_id = match tokens.get_mut(old_hash) {
            Some(old) if old.is_live_at(now) => {
                old.revoked_utc = Some(now);
                old.subject_id
            }
            _ => return Ok(None),
        };

        let successor = RefreshToken::new(subject_id, new_hash.to_string(), new_expiry_utc, now);
        tokens.insert(successor.token_hash.clone(), successor.clone());
        Ok(Some(successor))
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut tokens = self.refresh_tokens.lock();
        match tokens.get_mut(token_hash) {
            Some(token) if token.is_live_at(now) => {
                token.revoked_utc = Some(now);
                Ok(Some(token.subject_id))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tokens = self.refresh_tokens.lock();
        let mut revoked = 0;
        for token in tokens
            .values_mut()
            .filter(|t| t.subject_id == subject_id && t.is_live_at(now))
        {
            token.revoked_utc = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_refresh_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.refresh_tokens.lock();
        let len = tokens.len();
        tokens.retain(|_, t| t.expiry_utc >= before && t.revoked_utc.map_or(true, |r| r >= before));
        Ok((len - tokens.len()) as u64)
    }
}

#[async_trait]
impl VerificationTokenStore for MemoryStore {
    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        match self.verification_tokens.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(
                "verification token exists".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(())
            }
        }
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        // The shard write lock held by `get_mut` makes check-and-set atomic.
        match self.verification_tokens.get_mut(token_hash) {
            Some(mut token) if token.is_redeemable_at(purpose, now) => {
                token.used = true;
                token.used_utc = Some(now);
                Ok(Some(token.subject_id))
            }
            _ => Ok(None),
        }
    }

    async fn purge_verification_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let len = self.verification_tokens.len();
        self.verification_tokens
            .retain(|_, t| t.expiry_utc >= before && t.used_utc.map_or(true, |u| u >= before));
        Ok(len.saturating_sub(self.verification_tokens.len()) as u64)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment_within_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Option<u32>, StoreError> {
        if limit == 0 {
            return Ok(None);
        }

        match self.counters.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert((window_start, 1));
                Ok(Some(1))
            }
            Entry::Occupied(mut slot) => {
                let (start, count) = slot.get_mut();
                let current = if *start == window_start { *count } else { 0 };
                if current >= limit {
                    return Ok(None);
                }
                *start = window_start;
                *count = current + 1;
                Ok(Some(*count))
            }
        }
    }

    async fn purge_rate_limit_counters(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let len = self.counters.len();
        self.counters.retain(|_, (start, _)| *start >= before);
        Ok(len.saturating_sub(self.counters.len()) as u64)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, StoreError> {
        Ok(self.policy_rules.lock().iter().cloned().collect())
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        Ok(self.policy_rules.lock().insert(rule.clone()))
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        Ok(self.policy_rules.lock().remove(rule))
    }

    async fn remove_filtered_rules(&self, filter: &RuleFilter) -> Result<u64, StoreError> {
        let mut rules = self.policy_rules.lock();
        let len = rules.len();
        rules.retain(|rule| !filter.matches(rule));
        Ok((len - rules.len()) as u64)
    }

    async fn update_rule(&self, old: &PolicyRule, new: &PolicyRule) -> Result<bool, StoreError> {
        let mut rules = self.policy_rules.lock();
        if !rules.contains(old) {
            return Ok(false);
        }
        if old != new && rules.contains(new) {
            return Err(StoreError::Conflict("rule already exists".to_string()));
        }
        rules.remove(old);
        rules.insert(new.clone());
        Ok(true)
    }

    async fn replace_all_rules(&self, new_rules: &[PolicyRule]) -> Result<(), StoreError> {
        let mut rules = self.policy_rules.lock();
        *rules = new_rules.iter().cloned().collect();
        Ok(())
    }

    async fn rule_stats(&self) -> Result<PolicyStats, StoreError> {
        Ok(PolicyStats::from_rules(self.policy_rules.lock().iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Policy, RoleAssignment, SigningAlgorithm};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_username_conflicts_case_insensitively() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let alice = Credential::new("alice".into(), "a@example.com".into(), None, "h".into(), now);
        let shadow = Credential::new("ALICE".into(), "b@example.com".into(), None, "h".into(), now);

        store.insert_credential(&alice).await.unwrap();
        assert!(matches!(
            store.insert_credential(&shadow).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store
            .find_credential_by_username("Alice")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn deleted_credential_frees_username_and_email() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let carol = Credential::new("carol".into(), "c@example.com".into(), None, "h".into(), now);

        store.insert_credential(&carol).await.unwrap();
        assert!(store.delete_credential(carol.user_id).await.unwrap());
        assert!(!store.delete_credential(carol.user_id).await.unwrap());

        let again = Credential::new("Carol".into(), "C@example.com".into(), None, "h".into(), now);
        store.insert_credential(&again).await.unwrap();
    }

    #[tokio::test]
    async fn last_active_signing_key_stays_active() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = SigningKey::generate(SigningAlgorithm::HS256, now);
        let new = SigningKey::generate(SigningAlgorithm::HS256, now + Duration::seconds(1));
        store.insert_signing_key(&old).await.unwrap();
        store.insert_signing_key(&new).await.unwrap();

        assert_eq!(
            store.deactivate_signing_key(old.key_id, now).await.unwrap(),
            KeyDeactivation::Deactivated
        );
        assert_eq!(
            store.deactivate_signing_key(old.key_id, now).await.unwrap(),
            KeyDeactivation::NotActive
        );
        assert_eq!(
            store.deactivate_signing_key(new.key_id, now).await.unwrap(),
            KeyDeactivation::LastActiveKey
        );
        assert_eq!(store.active_signing_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn counter_resets_in_a_new_window_and_stops_at_limit() {
        let store = MemoryStore::new();
        let window = Utc::now();

        for expected in 1..=3 {
            assert_eq!(
                store.increment_within_limit("k", window, 3).await.unwrap(),
                Some(expected)
            );
        }
        assert_eq!(store.increment_within_limit("k", window, 3).await.unwrap(), None);
        assert_eq!(store.rate_limit_count("k"), Some(3));

        let next = window + Duration::minutes(1);
        assert_eq!(store.increment_within_limit("k", next, 3).await.unwrap(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumption_succeeds_once() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let token = VerificationToken::new(
            Uuid::new_v4(),
            TokenPurpose::Email,
            "hash".into(),
            Duration::minutes(30),
            now,
        );
        store.insert_verification_token(&token).await.unwrap();

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .consume_verification_token("hash", TokenPurpose::Email, now)
                    .await
            })
        });

        let successes = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(Some(_)))))
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn rotation_revokes_old_token_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let subject = Uuid::new_v4();
        let expiry = now + Duration::days(7);
        store
            .insert_refresh_token(&RefreshToken::new(subject, "old".into(), expiry, now))
            .await
            .unwrap();

        let successor = store
            .rotate_refresh_token("old", "new", expiry, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(successor.subject_id, subject);

        assert!(store
            .rotate_refresh_token("old", "newer", expiry, now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.refresh_token_count(), 2);
    }

    #[tokio::test]
    async fn filtered_removal_cascades_role() {
        let store = MemoryStore::new();
        let subject = Uuid::new_v4();
        store
            .add_rule(&Policy::new("editor", "/posts", "POST").into())
            .await
            .unwrap();
        store
            .add_rule(&Policy::new("admin", "/posts", "POST").into())
            .await
            .unwrap();
        store
            .add_rule(&RoleAssignment::new(subject, "editor").into())
            .await
            .unwrap();

        assert_eq!(
            store
                .remove_filtered_rules(&RuleFilter::policies_for_role("editor"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .remove_filtered_rules(&RuleFilter::assignments_for_role("editor"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.load_rules().await.unwrap().len(), 1);
    }
}
