pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use press_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::AuthConfig;
use crate::middleware::{authentication_middleware, authorization_middleware, DOMAIN_HEADER};
use crate::services::{
    store::AuthStore, AdminService, AuthService, AuthSettings, Clock, Database, Janitor, Notifier,
    PolicyEnforcer, RateLimiter, ServiceError, SigningKeyCache, TokenIssuer, VerificationSettings,
    VerificationTokenService,
};
use crate::utils::PasswordHasher;
use press_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::well_known::openapi,
        handlers::auth::registration::register,
        handlers::auth::registration::request_email_verification,
        handlers::auth::registration::verify_email,
        handlers::auth::registration::request_phone_verification,
        handlers::auth::registration::verify_phone,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::me,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::reset_password,
        handlers::admin::policies::list_policies,
        handlers::admin::policies::add_policy,
        handlers::admin::policies::update_policy,
        handlers::admin::policies::remove_policy,
        handlers::admin::policies::delete_role,
        handlers::admin::policies::policy_stats,
        handlers::admin::policies::backup_policies,
        handlers::admin::policies::restore_policies,
        handlers::admin::roles::get_user_roles,
        handlers::admin::roles::assign_role,
        handlers::admin::roles::revoke_role,
        handlers::admin::roles::force_logout,
        handlers::admin::signing_keys::list_signing_keys,
        handlers::admin::signing_keys::rotate_signing_key,
        handlers::admin::signing_keys::deactivate_signing_key,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::FieldErrorBody,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::VerifyTokenRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::MessageResponse,
            dtos::auth::MeResponse,
            dtos::admin::PolicyRequest,
            dtos::admin::UpdatePolicyRequest,
            dtos::admin::RoleAssignmentRequest,
            dtos::admin::UserRolesResponse,
            dtos::admin::RotateKeyRequest,
            dtos::admin::ChangeResponse,
            dtos::admin::CountResponse,
            services::TokenResponse,
            models::Policy,
            models::RoleAssignment,
            models::PolicyStats,
            models::PolicySnapshot,
            models::SigningAlgorithm,
            models::SigningKeyInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login and token management"),
        (name = "Verification", description = "Email and phone verification"),
        (name = "Policies", description = "RBAC policy administration"),
        (name = "Roles", description = "Role assignments and sessions of users"),
        (name = "Signing Keys", description = "Access token signing key rotation"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Injected collaborators that differ between production and tests.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub auth_service: AuthService,
    pub admin_service: AdminService,
    pub tokens: TokenIssuer,
    pub verification: VerificationTokenService,
    pub limiter: RateLimiter,
    pub policy: PolicyEnforcer,
    pub clock: Arc<dyn Clock>,
    /// Set when running on Postgres; checked by `/health`.
    pub database: Option<Database>,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service onto one store backend.
    pub fn new<S: AuthStore + 'static>(
        config: AuthConfig,
        store: Arc<S>,
        collaborators: Collaborators,
        database: Option<Database>,
    ) -> Self {
        let Collaborators {
            clock,
            hasher,
            notifier,
        } = collaborators;
        let timeout = config.store.timeout();

        let keys = SigningKeyCache::new(
            store.clone(),
            clock.clone(),
            chrono::Duration::seconds(config.jwt.key_refresh_seconds as i64),
            timeout,
        );
        let tokens = TokenIssuer::new(
            keys,
            store.clone(),
            clock.clone(),
            config.jwt.issuer.clone(),
            chrono::Duration::minutes(config.jwt.access_token_expiry_minutes),
            chrono::Duration::days(config.jwt.refresh_token_expiry_days),
            timeout,
        );
        let limiter = RateLimiter::new(store.clone(), clock.clone(), timeout);
        let verification = VerificationTokenService::new(
            store.clone(),
            limiter.clone(),
            clock.clone(),
            VerificationSettings {
                ttl: chrono::Duration::minutes(config.verification.token_expiry_minutes),
                rate_limit: config.verification.rate_limit,
                rate_window_seconds: config.verification.rate_window_seconds,
            },
            timeout,
        );
        let policy = PolicyEnforcer::new(store.clone(), clock.clone(), timeout);

        let auth_service = AuthService::new(
            store.clone(),
            tokens.clone(),
            verification.clone(),
            limiter.clone(),
            policy.clone(),
            hasher,
            notifier,
            clock.clone(),
            AuthSettings {
                default_role: config.roles.default_role.clone(),
                self_assignable: config.roles.self_assignable.clone(),
                login_attempts: config.rate_limit.login_attempts,
                login_window_seconds: config.rate_limit.login_window_seconds,
                bootstrap_admin_username: config.roles.bootstrap_admin_username.clone(),
                signing_algorithm: config.jwt.algorithm,
            },
            timeout,
        );
        let admin_service = AdminService::new(
            store,
            policy.clone(),
            tokens.clone(),
            config.jwt.algorithm,
            timeout,
        );

        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Self {
            config,
            auth_service,
            admin_service,
            tokens,
            verification,
            limiter,
            policy,
            clock,
            database,
            ip_rate_limiter,
        }
    }

    /// Background housekeeping over the same services the handlers use.
    pub fn janitor(&self) -> Janitor {
        let retention_seconds = self
            .config
            .rate_limit
            .login_window_seconds
            .max(self.config.verification.rate_window_seconds);
        Janitor::new(
            self.tokens.clone(),
            self.verification.clone(),
            self.limiter.clone(),
            self.policy.clone(),
            self.clock.clone(),
            chrono::Duration::minutes(self.config.jwt.key_grace_minutes),
            chrono::Duration::seconds(retention_seconds as i64),
        )
    }
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let public_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/verify-email", post(handlers::auth::verify_email))
        .route("/auth/verify-phone", post(handlers::auth::verify_phone))
        .route(
            "/auth/request-password-reset",
            post(handlers::auth::request_password_reset),
        )
        .route(
            "/auth/reset-password",
            post(handlers::auth::reset_password),
        );

    let authenticated_routes = Router::new()
        .route(
            "/auth/request-email-verification",
            post(handlers::auth::request_email_verification),
        )
        .route(
            "/auth/request-phone-verification",
            post(handlers::auth::request_phone_verification),
        )
        .route("/auth/me", get(handlers::auth::me))
        .route_layer(from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ));

    // Authentication runs first: the last route_layer added is the outermost.
    let admin_routes = Router::new()
        .route(
            "/policies",
            get(handlers::admin::list_policies)
                .post(handlers::admin::add_policy)
                .put(handlers::admin::update_policy)
                .delete(handlers::admin::remove_policy),
        )
        .route("/policies/stats", get(handlers::admin::policy_stats))
        .route("/policies/backup", get(handlers::admin::backup_policies))
        .route("/policies/restore", post(handlers::admin::restore_policies))
        .route("/roles/:role", delete(handlers::admin::delete_role))
        .route(
            "/users/:id/roles",
            get(handlers::admin::get_user_roles)
                .post(handlers::admin::assign_role)
                .delete(handlers::admin::revoke_role),
        )
        .route("/users/:id/logout", post(handlers::admin::force_logout))
        .route("/signing-keys", get(handlers::admin::list_signing_keys))
        .route(
            "/signing-keys/rotate",
            post(handlers::admin::rotate_signing_key),
        )
        .route(
            "/signing-keys/:id",
            delete(handlers::admin::deactivate_signing_key),
        )
        .route_layer(from_fn_with_state(state.clone(), authorization_middleware))
        .route_layer(from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ));

    let ip_limiter = state.ip_rate_limiter.clone();
    let cors = cors_layer(&state.config.security.allowed_origins);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(handlers::well_known::openapi),
        )
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .with_state(state)
        // Global IP rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}' ignored: {}", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(DOMAIN_HEADER),
        ])
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = match &state.database {
        Some(database) => {
            database.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                AppError::from(ServiceError::from(e))
            })?;
            "postgres"
        }
        None => "memory",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": store,
            "policies_loaded": state.policy.model().is_loaded(),
        }
    })))
}
