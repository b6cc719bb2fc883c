pub mod password;
pub mod validation;

pub use password::{Argon2Hasher, Password, PasswordHashString, PasswordHasher};
pub use validation::{ValidateRequest, ValidatedJson};
