//! Refresh token model. Only the SHA-256 hash of the opaque token is stored.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub subject_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        subject_id: Uuid,
        token_hash: String,
        expiry_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            subject_id,
            token_hash,
            expiry_utc,
            revoked_utc: None,
            created_utc: now,
        }
    }

    /// Live means neither revoked nor expired at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }

    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn hash_is_stable_hex() {
        let a = RefreshToken::hash_token("abc");
        let b = RefreshToken::hash_token("abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, RefreshToken::hash_token("abd"));
    }

    #[test]
    fn liveness_respects_expiry_and_revocation() {
        let now = Utc::now();
        let mut token = RefreshToken::new(
            Uuid::new_v4(),
            RefreshToken::hash_token("t"),
            now + Duration::days(7),
            now,
        );
        assert!(token.is_live_at(now));
        assert!(!token.is_live_at(now + Duration::days(7)));

        token.revoked_utc = Some(now);
        assert!(!token.is_live_at(now));
    }
}
