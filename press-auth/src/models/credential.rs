//! Credential model - the login identity of a subject.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Credential record. `user_id` is the subject id carried in tokens and
/// role assignments.
#[derive(Clone, FromRow)]
pub struct Credential {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub email_verified_utc: Option<DateTime<Utc>>,
    pub phone_verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        username: String,
        email: String,
        phone: Option<String>,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            username,
            email,
            phone,
            password_hash,
            email_verified_utc: None,
            phone_verified_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_email_verified(&self) -> bool {
        self.email_verified_utc.is_some()
    }

    pub fn is_phone_verified(&self) -> bool {
        self.phone_verified_utc.is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password_hash", &"<redacted>")
            .field("email_verified_utc", &self.email_verified_utc)
            .field("phone_verified_utc", &self.phone_verified_utc)
            .finish()
    }
}
