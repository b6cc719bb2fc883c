use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use press_core::error::AppError;

use crate::{
    dtos::{
        auth::{MessageResponse, RegisterRequest, RegisterResponse, VerifyTokenRequest},
        ErrorResponse,
    },
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Register a new user
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Username or email already registered", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

/// Send a new email verification link to the caller
#[utoipa::path(
    post,
    path = "/auth/request-email-verification",
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Verification",
    security(("bearer_auth" = []))
)]
pub async fn request_email_verification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    let res = state
        .auth_service
        .request_email_verification(user.subject_id)
        .await?;
    Ok(Json(res))
}

/// Redeem an email verification token
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(state.auth_service.verify_email(&req.token).await?))
}

/// Send a verification code to the caller's phone
#[utoipa::path(
    post,
    path = "/auth/request-phone-verification",
    responses(
        (status = 200, description = "Verification code sent", body = MessageResponse),
        (status = 400, description = "No phone number on file", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Verification",
    security(("bearer_auth" = []))
)]
pub async fn request_phone_verification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    let res = state
        .auth_service
        .request_phone_verification(user.subject_id)
        .await?;
    Ok(Json(res))
}

/// Redeem a phone verification code
#[utoipa::path(
    post,
    path = "/auth/verify-phone",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Phone verified", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_phone(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(state.auth_service.verify_phone(&req.token).await?))
}
