//! Services layer for press-auth.
//!
//! Token issuance and validation, verification tokens, rate limiting, RBAC
//! enforcement and the flows composed from them. Persistence is reached only
//! through the traits in [`store`].

pub mod admin;
pub mod auth;
pub mod clock;
mod database;
pub mod error;
pub mod janitor;
pub mod jwt;
pub mod key_cache;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod policy;
pub mod rate_limiter;
pub mod store;
pub mod verification;

pub use admin::AdminService;
pub use auth::{AuthService, AuthSettings};
pub use clock::{Clock, MockClock, SystemClock};
pub use database::Database;
pub use error::{ServiceError, StoreError};
pub use janitor::Janitor;
pub use jwt::{AccessTokenClaims, TokenIssuer, TokenResponse, ValidatedToken};
pub use key_cache::SigningKeyCache;
pub use memory::MemoryStore;
pub use notifier::{LogNotifier, MockNotifier, Notifier, SmtpNotifier};
pub use policy::PolicyEnforcer;
pub use rate_limiter::RateLimiter;
pub use store::AuthStore;
pub use verification::{VerificationSettings, VerificationTokenService};
