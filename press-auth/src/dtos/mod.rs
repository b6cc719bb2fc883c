pub mod admin;
pub mod auth;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Invalid credentials")]
    pub error: String,
    /// Present on validation errors: one entry per failed rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldErrorBody>>,
}

/// Schema of `press_core::error::FieldError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FieldErrorBody {
    #[schema(example = "password")]
    pub field: String,
    #[schema(example = "length")]
    pub rule: String,
    #[schema(example = "Password must be at least 8 characters")]
    pub message: String,
}

