use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::utils::validation::{validate_password_strength, validate_phone, validate_username};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_username"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,

    #[validate(custom(function = "validate_phone"))]
    #[schema(example = "+15550100123")]
    pub phone: Option<String>,

    #[validate(custom(function = "validate_password_strength"))]
    #[schema(example = "correct-horse-42", min_length = 8)]
    pub password: String,

    /// Must be one of the self-assignable roles. Defaults to the configured default role.
    #[schema(example = "user")]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    #[schema(example = "alice")]
    pub username: String,
    pub roles: Vec<String>,
    #[schema(example = "Registration successful. Please check your email to verify your account.")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Username, or email when it contains `@`.
    #[validate(length(min = 1, max = 254, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    #[schema(example = "correct-horse-42")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "Zk9x...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "Zk9x...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyTokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "q3L0...")]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "q3L0...")]
    pub token: String,

    #[validate(custom(function = "validate_password_strength"))]
    #[schema(example = "new-horse-43", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Email verified successfully")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "alice@example.com")]
    pub email: String,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ValidateRequest;

    fn register(username: &str, phone: Option<&str>, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: "alice@example.com".to_string(),
            phone: phone.map(str::to_string),
            password: password.to_string(),
            role: None,
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(register("alice", Some("+15550100123"), "correct-horse-42")
            .validate_request()
            .is_ok());
        assert!(register("alice", None, "correct-horse-42")
            .validate_request()
            .is_ok());
    }

    #[test]
    fn every_failed_rule_is_reported() {
        let errors = register("a", Some("555"), "short")
            .validate_request()
            .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["password", "phone", "username"]);
    }
}
