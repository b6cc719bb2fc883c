use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use press_core::error::AppError;

use crate::{
    dtos::{
        admin::{ChangeResponse, CountResponse, PolicyQuery, PolicyRequest, UpdatePolicyRequest},
        ErrorResponse,
    },
    models::{Policy, PolicySnapshot, PolicyStats},
    utils::ValidatedJson,
    AppState,
};

/// List policies, optionally for one role
#[utoipa::path(
    get,
    path = "/policies",
    params(PolicyQuery),
    responses(
        (status = 200, description = "Policies", body = Vec<Policy>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<Vec<Policy>>, AppError> {
    let policies = state.admin_service.list_policies(query.role.as_deref())?;
    Ok(Json(policies))
}

/// Grant a permission to a role
#[utoipa::path(
    post,
    path = "/policies",
    request_body = PolicyRequest,
    responses(
        (status = 201, description = "Policy added", body = ChangeResponse),
        (status = 200, description = "Policy already present", body = ChangeResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn add_policy(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let changed = state.admin_service.add_policy(req).await?;
    let status = if changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ChangeResponse { changed })))
}

/// Replace one policy with another
#[utoipa::path(
    put,
    path = "/policies",
    request_body = UpdatePolicyRequest,
    responses(
        (status = 204, description = "Policy updated"),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Policy not found", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn update_policy(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<UpdatePolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.admin_service.update_policy(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke a permission from a role
#[utoipa::path(
    delete,
    path = "/policies",
    request_body = PolicyRequest,
    responses(
        (status = 200, description = "Policy removed", body = ChangeResponse),
        (status = 400, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn remove_policy(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<Json<ChangeResponse>, AppError> {
    let changed = state.admin_service.remove_policy(req).await?;
    Ok(Json(ChangeResponse { changed }))
}

/// Delete a role with all its policies and assignments
#[utoipa::path(
    delete,
    path = "/roles/{role}",
    params(("role" = String, Path, description = "Role name")),
    responses(
        (status = 200, description = "Rules removed", body = CountResponse),
        (status = 400, description = "Invalid role name", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state.admin_service.delete_role(&role).await?;
    Ok(Json(CountResponse { count }))
}

/// Rule counts by role and by user
#[utoipa::path(
    get,
    path = "/policies/stats",
    responses(
        (status = 200, description = "Policy statistics", body = PolicyStats)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn policy_stats(State(state): State<AppState>) -> Result<Json<PolicyStats>, AppError> {
    Ok(Json(state.admin_service.policy_stats().await?))
}

/// Export every policy and role assignment
#[utoipa::path(
    get,
    path = "/policies/backup",
    responses(
        (status = 200, description = "Policy snapshot", body = PolicySnapshot)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn backup_policies(
    State(state): State<AppState>,
) -> Result<Json<PolicySnapshot>, AppError> {
    Ok(Json(state.admin_service.backup_policies().await?))
}

/// Replace all policies and role assignments with a snapshot
#[utoipa::path(
    post,
    path = "/policies/restore",
    request_body = PolicySnapshot,
    responses(
        (status = 200, description = "Rules restored", body = CountResponse),
        (status = 400, description = "Invalid snapshot", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("bearer_auth" = []))
)]
pub async fn restore_policies(
    State(state): State<AppState>,
    Json(snapshot): Json<PolicySnapshot>,
) -> Result<Json<CountResponse>, AppError> {
    let restored = state.admin_service.restore_policies(snapshot).await?;
    Ok(Json(CountResponse {
        count: restored as u64,
    }))
}
