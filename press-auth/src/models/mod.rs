//! Persistent and wire-level entities of the auth subsystem.

pub mod credential;
pub mod policy;
pub mod refresh_token;
pub mod signing_key;
pub mod verification_token;

pub use credential::Credential;
pub use policy::{
    normalize_action, normalize_resource, Policy, PolicyRule, PolicySnapshot, PolicyStats,
    RoleAssignment, RuleFilter,
};
pub use refresh_token::RefreshToken;
pub use signing_key::{SigningAlgorithm, SigningKey, SigningKeyInfo};
pub use verification_token::{TokenPurpose, VerificationToken};
