//! Read-through cache of active signing keys.
//!
//! Readers load an immutable [`KeySnapshot`] through `ArcSwap` without taking
//! a lock. Reloads and rotations build a new snapshot and swap it in whole.

use super::clock::Clock;
use super::error::{ServiceError, StoreError};
use super::store::{bounded, KeyDeactivation, KeyStore};
use crate::models::{SigningAlgorithm, SigningKey, SigningKeyInfo};
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::sync::Arc;
use uuid::Uuid;

/// Minimum spacing between reloads triggered by an unknown `kid`.
const MISS_RELOAD_INTERVAL_MS: i64 = 1000;

/// A key ready for signing and verification.
pub struct PreparedKey {
    pub key_id: Uuid,
    pub algorithm: SigningAlgorithm,
    pub created_utc: DateTime<Utc>,
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl PreparedKey {
    fn prepare(key: &SigningKey) -> Result<Self, StoreError> {
        let algorithm = key.algorithm().map_err(StoreError::Corrupt)?;
        let secret = key
            .secret()
            .map_err(|e| StoreError::Corrupt(format!("key {}: {}", key.key_id, e)))?;

        Ok(Self {
            key_id: key.key_id,
            algorithm,
            created_utc: key.created_utc,
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
        })
    }
}

/// Active keys, newest first.
#[derive(Default)]
pub struct KeySnapshot {
    keys: Vec<Arc<PreparedKey>>,
    loaded_utc: Option<DateTime<Utc>>,
}

impl KeySnapshot {
    fn build(rows: &[SigningKey], loaded_utc: DateTime<Utc>) -> Result<Self, StoreError> {
        let mut keys = rows
            .iter()
            .filter(|k| k.is_active)
            .map(|k| PreparedKey::prepare(k).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        // Newest signs. Ties broken by id so every replica picks the same key.
        keys.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.key_id.cmp(&a.key_id))
        });
        Ok(Self {
            keys,
            loaded_utc: Some(loaded_utc),
        })
    }

    pub fn newest(&self) -> Option<&Arc<PreparedKey>> {
        self.keys.first()
    }

    pub fn find(&self, key_id: Uuid) -> Option<&Arc<PreparedKey>> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    pub fn keys(&self) -> &[Arc<PreparedKey>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Clone)]
pub struct SigningKeyCache {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    snapshot: ArcSwap<KeySnapshot>,
    refresh_interval: Duration,
    timeout: std::time::Duration,
    writer: tokio::sync::Mutex<()>,
}

impl SigningKeyCache {
    pub fn new(
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        refresh_interval: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                snapshot: ArcSwap::from_pointee(KeySnapshot::default()),
                refresh_interval,
                timeout,
                writer: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current snapshot, reloaded from the store first when stale.
    pub async fn snapshot(&self) -> Result<Arc<KeySnapshot>, ServiceError> {
        let current = self.inner.snapshot.load_full();
        let now = self.inner.clock.now();
        match current.loaded_utc {
            Some(loaded) if now - loaded < self.inner.refresh_interval => Ok(current),
            _ => self.reload().await,
        }
    }

    /// Snapshot after an unknown `kid`: reload unless one just happened.
    pub async fn snapshot_after_miss(&self) -> Result<Arc<KeySnapshot>, ServiceError> {
        let current = self.inner.snapshot.load_full();
        let now = self.inner.clock.now();
        match current.loaded_utc {
            Some(loaded) if now - loaded < Duration::milliseconds(MISS_RELOAD_INTERVAL_MS) => {
                Ok(current)
            }
            _ => self.reload().await,
        }
    }

    pub async fn reload(&self) -> Result<Arc<KeySnapshot>, ServiceError> {
        let rows = bounded(self.inner.timeout, self.inner.store.active_signing_keys()).await?;
        let snapshot = Arc::new(KeySnapshot::build(&rows, self.inner.clock.now())?);
        self.inner.snapshot.store(snapshot.clone());
        tracing::debug!(active_keys = snapshot.len(), "Signing key snapshot reloaded");
        Ok(snapshot)
    }

    /// Generate and persist a new key, which becomes the signing key.
    pub async fn rotate(&self, algorithm: SigningAlgorithm) -> Result<SigningKeyInfo, ServiceError> {
        let _guard = self.inner.writer.lock().await;

        let key = SigningKey::generate(algorithm, self.inner.clock.now());
        bounded(self.inner.timeout, self.inner.store.insert_signing_key(&key)).await?;
        self.reload().await?;

        tracing::info!(key_id = %key.key_id, algorithm = algorithm.as_str(), "Signing key rotated in");
        Ok(key.info())
    }

    /// Deactivate a key. Tokens it signed stop validating immediately. The
    /// only active key is never deactivated, since issuance needs one.
    pub async fn deactivate(&self, key_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.inner.writer.lock().await;

        match self.deactivate_locked(key_id).await? {
            KeyDeactivation::Deactivated => Ok(()),
            KeyDeactivation::NotActive => {
                Err(ServiceError::NotFound("Active signing key".to_string()))
            }
            KeyDeactivation::LastActiveKey => Err(ServiceError::Conflict(
                "Cannot deactivate the only active signing key; rotate first".to_string(),
            )),
        }
    }

    /// Caller holds `writer`.
    async fn deactivate_locked(&self, key_id: Uuid) -> Result<KeyDeactivation, ServiceError> {
        let now = self.inner.clock.now();
        let outcome = bounded(
            self.inner.timeout,
            self.inner.store.deactivate_signing_key(key_id, now),
        )
        .await?;
        self.reload().await?;

        if outcome == KeyDeactivation::Deactivated {
            tracing::warn!(key_id = %key_id, "Signing key deactivated");
        }
        Ok(outcome)
    }

    /// Make sure at least one key is active, generating one if needed.
    pub async fn ensure_active_key(&self, algorithm: SigningAlgorithm) -> Result<(), ServiceError> {
        if self.reload().await?.is_empty() {
            tracing::info!("No active signing key found, generating one");
            self.rotate(algorithm).await?;
        }
        Ok(())
    }

    /// Deactivate every key whose successor has been signing for longer than
    /// `grace`. The newest key is never retired.
    pub async fn retire_superseded(&self, grace: Duration) -> Result<usize, ServiceError> {
        let _guard = self.inner.writer.lock().await;
        let snapshot = self.reload().await?;
        let now = self.inner.clock.now();

        let retirable: Vec<Uuid> = snapshot
            .keys()
            .windows(2)
            .filter(|pair| now - pair[0].created_utc >= grace)
            .map(|pair| pair[1].key_id)
            .collect();

        let mut retired = 0;
        for key_id in retirable {
            if self.deactivate_locked(key_id).await? == KeyDeactivation::Deactivated {
                retired += 1;
            }
        }
        Ok(retired)
    }

    /// Metadata for every key, active or not, newest first.
    pub async fn list(&self) -> Result<Vec<SigningKeyInfo>, ServiceError> {
        let mut keys = bounded(self.inner.timeout, self.inner.store.all_signing_keys()).await?;
        keys.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(keys.iter().map(SigningKey::info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::MockClock;
    use crate::services::memory::MemoryStore;

    fn cache(store: Arc<MemoryStore>, clock: MockClock) -> SigningKeyCache {
        SigningKeyCache::new(
            store,
            Arc::new(clock),
            Duration::seconds(60),
            std::time::Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn bootstrap_generates_one_key() -> Result<(), anyhow::Error> {
        let store = Arc::new(MemoryStore::new());
        let keys = cache(store.clone(), MockClock::default());

        keys.ensure_active_key(SigningAlgorithm::HS256).await?;
        keys.ensure_active_key(SigningAlgorithm::HS256).await?;

        assert_eq!(keys.snapshot().await?.len(), 1);
        assert_eq!(store.all_signing_keys().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_swaps_newest_key() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let keys = cache(Arc::new(MemoryStore::new()), clock.clone());

        let first = keys.rotate(SigningAlgorithm::HS256).await?;
        clock.advance(Duration::minutes(1));
        let second = keys.rotate(SigningAlgorithm::HS512).await?;

        let snapshot = keys.snapshot().await?;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.newest().map(|k| k.key_id), Some(second.key_id));
        assert!(snapshot.find(first.key_id).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn stale_snapshot_picks_up_store_changes() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let store = Arc::new(MemoryStore::new());
        let keys = cache(store.clone(), clock.clone());
        keys.ensure_active_key(SigningAlgorithm::HS256).await?;

        // Written by another replica.
        store
            .insert_signing_key(&SigningKey::generate(SigningAlgorithm::HS256, clock.now()))
            .await?;
        assert_eq!(keys.snapshot().await?.len(), 1);

        clock.advance(Duration::seconds(61));
        assert_eq!(keys.snapshot().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn superseded_keys_retire_after_grace() -> Result<(), anyhow::Error> {
        let clock = MockClock::default();
        let keys = cache(Arc::new(MemoryStore::new()), clock.clone());

        let old = keys.rotate(SigningAlgorithm::HS256).await?;
        clock.advance(Duration::minutes(5));
        let new = keys.rotate(SigningAlgorithm::HS256).await?;

        clock.advance(Duration::minutes(10));
        assert_eq!(keys.retire_superseded(Duration::minutes(15)).await?, 0);

        clock.advance(Duration::minutes(5));
        assert_eq!(keys.retire_superseded(Duration::minutes(15)).await?, 1);

        let snapshot = keys.snapshot().await?;
        assert!(snapshot.find(old.key_id).is_none());
        assert_eq!(snapshot.newest().map(|k| k.key_id), Some(new.key_id));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deactivations_leave_one_key_active() -> Result<(), anyhow::Error> {
        for _ in 0..20 {
            let clock = MockClock::default();
            let store = Arc::new(MemoryStore::new());
            let keys = cache(store.clone(), clock.clone());
            let first = keys.rotate(SigningAlgorithm::HS256).await?;
            clock.advance(Duration::seconds(1));
            let second = keys.rotate(SigningAlgorithm::HS256).await?;

            let handles: Vec<_> = [first.key_id, second.key_id]
                .into_iter()
                .map(|key_id| {
                    let keys = keys.clone();
                    tokio::spawn(async move { keys.deactivate(key_id).await })
                })
                .collect();
            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await?);
            }

            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(outcomes
                .iter()
                .any(|r| matches!(r, Err(ServiceError::Conflict(_)))));
            assert_eq!(store.active_signing_keys().await?.len(), 1);
            assert_eq!(keys.snapshot().await?.len(), 1);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retirement_racing_deactivation_keeps_a_key() -> Result<(), anyhow::Error> {
        for _ in 0..20 {
            let clock = MockClock::default();
            let store = Arc::new(MemoryStore::new());
            let keys = cache(store.clone(), clock.clone());
            keys.rotate(SigningAlgorithm::HS256).await?;
            clock.advance(Duration::minutes(5));
            let newest = keys.rotate(SigningAlgorithm::HS256).await?;
            clock.advance(Duration::minutes(20));

            let retiring = {
                let keys = keys.clone();
                tokio::spawn(async move { keys.retire_superseded(Duration::minutes(15)).await })
            };
            let deactivating = {
                let keys = keys.clone();
                tokio::spawn(async move { keys.deactivate(newest.key_id).await })
            };
            retiring.await??;
            let _ = deactivating.await?;

            assert_eq!(store.active_signing_keys().await?.len(), 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn deactivating_the_only_key_is_refused() -> Result<(), anyhow::Error> {
        let store = Arc::new(MemoryStore::new());
        let keys = cache(store.clone(), MockClock::default());
        let only = keys.rotate(SigningAlgorithm::HS256).await?;

        assert!(matches!(
            keys.deactivate(only.key_id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            keys.deactivate(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(store.active_signing_keys().await?.len(), 1);
        Ok(())
    }
}
