use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use press_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{ChangeResponse, CountResponse, RoleAssignmentRequest, UserRolesResponse},
        ErrorResponse,
    },
    utils::ValidatedJson,
    AppState,
};

/// Role assignments of a user
#[utoipa::path(
    get,
    path = "/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Role assignments", body = UserRolesResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserRolesResponse>, AppError> {
    Ok(Json(state.admin_service.user_roles(user_id).await?))
}

/// Assign a role to a user
#[utoipa::path(
    post,
    path = "/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = RoleAssignmentRequest,
    responses(
        (status = 201, description = "Role assigned", body = ChangeResponse),
        (status = 200, description = "Role already assigned", body = ChangeResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RoleAssignmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let changed = state.admin_service.assign_role(user_id, req).await?;
    let status = if changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ChangeResponse { changed })))
}

/// Remove a role from a user
#[utoipa::path(
    delete,
    path = "/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = RoleAssignmentRequest,
    responses(
        (status = 200, description = "Role removed", body = ChangeResponse),
        (status = 400, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RoleAssignmentRequest>,
) -> Result<Json<ChangeResponse>, AppError> {
    let changed = state.admin_service.revoke_role(user_id, req).await?;
    Ok(Json(ChangeResponse { changed }))
}

/// Revoke every refresh token of a user
///
/// Access tokens already issued remain valid until they expire.
#[utoipa::path(
    post,
    path = "/users/{id}/logout",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Sessions revoked", body = CountResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn force_logout(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state.admin_service.force_logout(user_id).await?;
    Ok(Json(CountResponse { count }))
}
