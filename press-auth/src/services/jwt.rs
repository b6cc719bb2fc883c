use super::clock::Clock;
use super::error::ServiceError;
use super::key_cache::{PreparedKey, SigningKeyCache};
use super::store::{bounded, RefreshTokenStore};
use crate::models::RefreshToken;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, errors::ErrorKind, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// JWT ID
    pub jti: String,
}

/// A successfully validated access token.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub subject_id: Uuid,
    pub key_id: Uuid,
    pub claims: AccessTokenClaims,
}

/// Token response returned to client
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Issues and validates access tokens, issues and rotates refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: SigningKeyCache,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    timeout: std::time::Duration,
}

impl TokenIssuer {
    pub fn new(
        keys: SigningKeyCache,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        issuer: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            keys,
            refresh_tokens,
            clock,
            issuer,
            access_ttl,
            refresh_ttl,
            timeout,
        }
    }

    pub fn keys(&self) -> &SigningKeyCache {
        &self.keys
    }

    /// Access token lifetime in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Sign an access token with the newest active key.
    pub async fn generate_access_token(&self, subject_id: Uuid) -> Result<String, ServiceError> {
        let key = self.signing_key().await?;
        self.sign(&key, subject_id, self.clock.now())
    }

    /// Mint and persist an opaque refresh token bound to `subject_id`.
    pub async fn generate_refresh_token(&self, subject_id: Uuid) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let token = generate_opaque_token();
        let record = RefreshToken::new(
            subject_id,
            RefreshToken::hash_token(&token),
            now + self.refresh_ttl,
            now,
        );
        bounded(self.timeout, self.refresh_tokens.insert_refresh_token(&record)).await?;
        Ok(token)
    }

    pub async fn issue_token_pair(&self, subject_id: Uuid) -> Result<TokenResponse, ServiceError> {
        let access_token = self.generate_access_token(subject_id).await?;
        let refresh_token = self.generate_refresh_token(subject_id).await?;
        Ok(self.response(access_token, refresh_token))
    }

    /// Validate signature, issuer and validity window against every active key.
    pub async fn validate_access_token(&self, token: &str) -> Result<ValidatedToken, ServiceError> {
        let header = decode_header(token).map_err(|_| ServiceError::Malformed)?;
        let kid = header
            .kid
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| ServiceError::Malformed)?;

        let mut snapshot = self.keys.snapshot().await?;
        if let Some(kid) = kid {
            if snapshot.find(kid).is_none() {
                snapshot = self.keys.snapshot_after_miss().await?;
            }
        }

        // Matching kid first, then every other active key.
        let mut candidates: Vec<&Arc<PreparedKey>> = snapshot
            .keys()
            .iter()
            .filter(|k| k.algorithm.to_jwt() == header.alg)
            .collect();
        if let Some(kid) = kid {
            candidates.sort_by_key(|k| k.key_id != kid);
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        for key in candidates {
            match decode::<AccessTokenClaims>(token, &key.decoding, &validation) {
                Ok(data) => return self.check_claims(data.claims, key.key_id),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    _ => return Err(ServiceError::Malformed),
                },
            }
        }

        Err(ServiceError::InvalidSignature)
    }

    fn check_claims(
        &self,
        claims: AccessTokenClaims,
        key_id: Uuid,
    ) -> Result<ValidatedToken, ServiceError> {
        if claims.iss != self.issuer {
            return Err(ServiceError::InvalidSignature);
        }

        let now = self.clock.now().timestamp();
        if claims.exp <= now || claims.nbf > now {
            return Err(ServiceError::Expired);
        }

        let subject_id = Uuid::parse_str(&claims.sub).map_err(|_| ServiceError::Malformed)?;
        Ok(ValidatedToken {
            subject_id,
            key_id,
            claims,
        })
    }

    /// Consume `old_refresh` and issue a new pair. The revoke of the old token
    /// and the insert of its successor commit together or not at all.
    pub async fn refresh_tokens(&self, old_refresh: &str) -> Result<TokenResponse, ServiceError> {
        // Resolve the signing key before touching the store so a key outage
        // does not burn the caller's refresh token.
        let key = self.signing_key().await?;

        let now = self.clock.now();
        let new_refresh = generate_opaque_token();
        let rotated = bounded(
            self.timeout,
            self.refresh_tokens.rotate_refresh_token(
                &RefreshToken::hash_token(old_refresh),
                &RefreshToken::hash_token(&new_refresh),
                now + self.refresh_ttl,
                now,
            ),
        )
        .await?;

        let Some(successor) = rotated else {
            tracing::warn!("Refresh token rejected: unknown, expired or already used");
            return Err(ServiceError::InvalidOrExpired);
        };

        let access_token = self.sign(&key, successor.subject_id, now)?;
        tracing::info!(subject_id = %successor.subject_id, "Refresh token rotated");
        Ok(self.response(access_token, new_refresh))
    }

    /// Revoke one refresh token. Returns the owner when something was revoked.
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<Option<Uuid>, ServiceError> {
        bounded(
            self.timeout,
            self.refresh_tokens
                .revoke_refresh_token(&RefreshToken::hash_token(token), self.clock.now()),
        )
        .await
    }

    /// Revoke every refresh token of a subject (forced logout).
    pub async fn revoke_all(&self, subject_id: Uuid) -> Result<u64, ServiceError> {
        bounded(
            self.timeout,
            self.refresh_tokens
                .revoke_all_refresh_tokens(subject_id, self.clock.now()),
        )
        .await
    }

    /// Housekeeping: drop refresh tokens that expired or were revoked before `before`.
    pub async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, ServiceError> {
        bounded(self.timeout, self.refresh_tokens.purge_refresh_tokens(before)).await
    }

    async fn signing_key(&self) -> Result<Arc<PreparedKey>, ServiceError> {
        self.keys
            .snapshot()
            .await?
            .newest()
            .cloned()
            .ok_or(ServiceError::KeyUnavailable)
    }

    fn sign(
        &self,
        key: &PreparedKey,
        subject_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let claims = AccessTokenClaims {
            sub: subject_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(key.algorithm.to_jwt());
        header.kid = Some(key.key_id.to_string());

        encode(&header, &claims, &key.encoding)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    fn response(&self, access_token: String, refresh_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_seconds(),
        }
    }
}

/// 256 random bits, base64url without padding.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
