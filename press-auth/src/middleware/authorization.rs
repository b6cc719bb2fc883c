use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use press_core::error::AppError;

use super::auth::AuthContext;
use crate::{services::ServiceError, AppState};

/// Optional domain scope for the decision. Global grants apply in every domain.
pub const DOMAIN_HEADER: &str = "x-press-domain";

/// Checks the caller's roles against the route pattern and method. Must run
/// after `authentication_middleware` and be installed with `route_layer` so
/// the matched path is available.
pub async fn authorization_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(subject_id) = req.extensions().get::<AuthContext>().map(|c| c.subject_id) else {
        return Err(ServiceError::Unauthenticated.into());
    };

    let resource = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let action = req.method().as_str().to_string();
    let domain = req
        .headers()
        .get(DOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|d| !d.is_empty());

    match state
        .policy
        .enforce_subject(subject_id, &resource, &action, domain)
    {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => {
            tracing::warn!(
                subject_id = %subject_id,
                resource = %resource,
                action = %action,
                "Authorization denied"
            );
            Err(ServiceError::Forbidden.into())
        }
        Err(e) => {
            tracing::error!(error = %e, resource = %resource, "Authorization check failed, denying");
            Err(ServiceError::Forbidden.into())
        }
    }
}
