use axum::{extract::State, Json};
use press_core::error::AppError;

use crate::{
    dtos::{
        auth::{MessageResponse, PasswordResetConfirm, PasswordResetRequest},
        ErrorResponse,
    },
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset link
///
/// The response is the same whether or not the email is registered.
#[utoipa::path(
    post,
    path = "/auth/request-password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Request received", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(state.auth_service.request_password_reset(req).await?))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(state.auth_service.reset_password(req).await?))
}
