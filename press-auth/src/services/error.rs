use press_core::error::{AppError, FieldError};
use thiserror::Error;

/// Failure reported by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid or expired token")]
    InvalidOrExpired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No active signing key")]
    KeyUnavailable,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Store call timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServiceError::Validation(vec![FieldError::new(field, rule, message)])
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(errors) => AppError::ValidationError(errors),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            ServiceError::Forbidden => AppError::Forbidden(anyhow::anyhow!("Access denied")),
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(retry_after),
            ),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::InvalidOrExpired => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::InvalidSignature | ServiceError::Expired | ServiceError::Malformed => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired access token"))
            }
            ServiceError::KeyUnavailable => {
                AppError::InternalError(anyhow::anyhow!("No active signing key"))
            }
            ServiceError::Timeout => AppError::InternalError(anyhow::anyhow!("Store call timed out")),
            ServiceError::Storage(StoreError::Conflict(msg)) => {
                AppError::Conflict(anyhow::anyhow!(msg))
            }
            ServiceError::Storage(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(
            status_of(ServiceError::validation("email", "email", "Invalid email format")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ServiceError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ServiceError::RateLimited { retry_after: 30 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(ServiceError::Conflict("Username already taken".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::InvalidOrExpired), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::KeyUnavailable), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_of(ServiceError::Timeout), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_of(ServiceError::Storage(StoreError::Corrupt("bad row".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
