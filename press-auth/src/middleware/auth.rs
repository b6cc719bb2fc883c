use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use press_core::error::AppError;
use uuid::Uuid;

use crate::{
    services::{AccessTokenClaims, ServiceError},
    AppState,
};

/// The authenticated caller, placed in request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject_id: Uuid,
    pub claims: AccessTokenClaims,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Requires a valid bearer access token. On failure the request never
/// reaches the handler.
pub async fn authentication_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(req.headers()) else {
        return Err(ServiceError::Unauthenticated.into());
    };

    let validated = state.tokens.validate_access_token(token).await.map_err(|e| {
        match e {
            ServiceError::InvalidSignature | ServiceError::Expired | ServiceError::Malformed => {
                tracing::warn!(reason = %e, "Access token rejected")
            }
            _ => tracing::error!(error = %e, "Access token validation failed"),
        }
        AppError::from(e)
    })?;

    req.extensions_mut().insert(AuthContext {
        subject_id: validated.subject_id,
        claims: validated.claims,
    });

    Ok(next.run(req).await)
}

/// Extractor for handlers behind [`authentication_middleware`].
pub struct AuthUser(pub AuthContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth context missing from request extensions"
            ))
        })?;

        Ok(AuthUser(context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
