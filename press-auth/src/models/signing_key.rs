//! Signing key model for the shared-pool rotation scheme.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// HMAC algorithms a key may be used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SigningAlgorithm {
    HS256,
    HS384,
    HS512,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
        }
    }

    pub fn to_jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            SigningAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            SigningAlgorithm::HS384 => jsonwebtoken::Algorithm::HS384,
            SigningAlgorithm::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }

    /// Bytes of key material generated for this algorithm.
    fn secret_len(self) -> usize {
        match self {
            SigningAlgorithm::HS256 => 32,
            SigningAlgorithm::HS384 => 48,
            SigningAlgorithm::HS512 => 64,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(SigningAlgorithm::HS256),
            "HS384" => Ok(SigningAlgorithm::HS384),
            "HS512" => Ok(SigningAlgorithm::HS512),
            other => Err(format!("unsupported signing algorithm: {}", other)),
        }
    }
}

/// A persisted signing key. `key_material` is base64 encoded secret bytes.
#[derive(Clone, FromRow)]
pub struct SigningKey {
    pub key_id: Uuid,
    pub key_material: String,
    pub algorithm: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub deactivated_utc: Option<DateTime<Utc>>,
}

impl SigningKey {
    /// Generate fresh random key material.
    pub fn generate(algorithm: SigningAlgorithm, now: DateTime<Utc>) -> Self {
        let mut secret = vec![0u8; algorithm.secret_len()];
        rand::rngs::OsRng.fill_bytes(&mut secret);

        Self {
            key_id: Uuid::new_v4(),
            key_material: STANDARD.encode(&secret),
            algorithm: algorithm.as_str().to_string(),
            is_active: true,
            created_utc: now,
            deactivated_utc: None,
        }
    }

    pub fn algorithm(&self) -> Result<SigningAlgorithm, String> {
        self.algorithm.parse()
    }

    pub fn secret(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.key_material)
    }

    pub fn info(&self) -> SigningKeyInfo {
        SigningKeyInfo {
            key_id: self.key_id,
            algorithm: self.algorithm.clone(),
            is_active: self.is_active,
            created_utc: self.created_utc,
            deactivated_utc: self.deactivated_utc,
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("is_active", &self.is_active)
            .field("created_utc", &self.created_utc)
            .finish_non_exhaustive()
    }
}

/// Key metadata for the admin API. Never carries key material.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SigningKeyInfo {
    pub key_id: Uuid,
    pub algorithm: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub deactivated_utc: Option<DateTime<Utc>>,
}
