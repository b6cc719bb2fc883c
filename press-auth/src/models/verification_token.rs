//! Single-use verification tokens (email, phone, password reset).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Email,
    Phone,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Email => "email",
            TokenPurpose::Phone => "phone",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(TokenPurpose::Email),
            "phone" => Ok(TokenPurpose::Phone),
            "password_reset" => Ok(TokenPurpose::PasswordReset),
            other => Err(format!("unknown token purpose: {}", other)),
        }
    }
}

/// Persisted verification token. `token_hash` is the SHA-256 of the opaque
/// value handed to the subject.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub token_id: Uuid,
    pub subject_id: Uuid,
    pub token_hash: String,
    pub purpose: String,
    pub used: bool,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
}

impl VerificationToken {
    pub fn new(
        subject_id: Uuid,
        purpose: TokenPurpose,
        token_hash: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            subject_id,
            token_hash,
            purpose: purpose.as_str().to_string(),
            used: false,
            expiry_utc: now + ttl,
            created_utc: now,
            used_utc: None,
        }
    }

    /// Same digest as refresh tokens; the plain value never reaches the store.
    pub fn hash_token(token: &str) -> String {
        super::RefreshToken::hash_token(token)
    }

    pub fn is_redeemable_at(&self, purpose: TokenPurpose, now: DateTime<Utc>) -> bool {
        !self.used && self.purpose == purpose.as_str() && self.expiry_utc > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_round_trips_through_str() {
        for purpose in [TokenPurpose::Email, TokenPurpose::Phone, TokenPurpose::PasswordReset] {
            assert_eq!(purpose.as_str().parse::<TokenPurpose>(), Ok(purpose));
        }
        assert!("sms".parse::<TokenPurpose>().is_err());
    }

    #[test]
    fn redeemable_only_for_declared_purpose_before_expiry() {
        let now = Utc::now();
        let token = VerificationToken::new(
            Uuid::new_v4(),
            TokenPurpose::Email,
            "hash".to_string(),
            Duration::minutes(30),
            now,
        );

        assert!(token.is_redeemable_at(TokenPurpose::Email, now));
        assert!(!token.is_redeemable_at(TokenPurpose::PasswordReset, now));
        assert!(!token.is_redeemable_at(TokenPurpose::Email, now + Duration::minutes(30)));
    }
}
