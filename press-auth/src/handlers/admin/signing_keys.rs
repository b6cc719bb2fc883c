use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use press_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{admin::RotateKeyRequest, ErrorResponse},
    models::SigningKeyInfo,
    AppState,
};

/// Active signing keys (metadata only)
#[utoipa::path(
    get,
    path = "/signing-keys",
    responses(
        (status = 200, description = "Active keys, newest first", body = Vec<SigningKeyInfo>)
    ),
    tag = "Signing Keys",
    security(("bearer_auth" = []))
)]
pub async fn list_signing_keys(
    State(state): State<AppState>,
) -> Result<Json<Vec<SigningKeyInfo>>, AppError> {
    Ok(Json(state.admin_service.list_signing_keys().await?))
}

/// Generate a new signing key and make it current
///
/// Earlier keys keep validating tokens until they are retired.
#[utoipa::path(
    post,
    path = "/signing-keys/rotate",
    request_body = RotateKeyRequest,
    responses(
        (status = 201, description = "Key rotated", body = SigningKeyInfo)
    ),
    tag = "Signing Keys",
    security(("bearer_auth" = []))
)]
pub async fn rotate_signing_key(
    State(state): State<AppState>,
    req: Option<Json<RotateKeyRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let key = state
        .admin_service
        .rotate_signing_key(req.algorithm)
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

/// Deactivate a signing key
#[utoipa::path(
    delete,
    path = "/signing-keys/{id}",
    params(("id" = Uuid, Path, description = "Key id")),
    responses(
        (status = 204, description = "Key deactivated"),
        (status = 404, description = "No active key with that id", body = ErrorResponse),
        (status = 409, description = "Key is the only active key", body = ErrorResponse)
    ),
    tag = "Signing Keys",
    security(("bearer_auth" = []))
)]
pub async fn deactivate_signing_key(
    State(state): State<AppState>,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.admin_service.deactivate_signing_key(key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
