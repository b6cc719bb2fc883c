//! Shared setup for press-auth integration tests: the full router on the
//! in-memory store, with a mock clock and a recording notifier.

#![allow(dead_code)]

use argon2::Params;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use press_auth::{
    build_router,
    config::AuthConfig,
    models::TokenPurpose,
    services::{MemoryStore, MockClock, MockNotifier},
    utils::Argon2Hasher,
    AppState, Collaborators,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_USERNAME: &str = "root";
pub const PASSWORD: &str = "correct-horse-9";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: MockClock,
    pub notifier: MockNotifier,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> TestApp {
        Self::spawn_with(AuthConfig::default()).await
    }

    pub async fn spawn_with(mut config: AuthConfig) -> TestApp {
        config.roles.bootstrap_admin_username = Some(ADMIN_USERNAME.to_string());

        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::default();
        let notifier = MockNotifier::new();
        // Minimum Argon2 cost keeps the suite fast.
        let params = Params::new(8, 1, 1, None).expect("valid argon2 params");

        let state = AppState::new(
            config,
            store.clone(),
            Collaborators {
                clock: Arc::new(clock.clone()),
                hasher: Arc::new(Argon2Hasher::new(params)),
                notifier: Arc::new(notifier.clone()),
            },
            None,
        );
        state
            .auth_service
            .bootstrap()
            .await
            .expect("Failed to bootstrap");

        let router = build_router(state.clone()).expect("Failed to build router");

        TestApp {
            router,
            state,
            store,
            clock,
            notifier,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, None, Some(body)).await
    }

    /// Registers `username` with `<username>@example.com` and returns the user id.
    pub async fn register(&self, username: &str) -> Uuid {
        let res = self
            .post(
                "/auth/register",
                json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "phone": "+14155550100",
                    "password": PASSWORD,
                }),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "register: {}", res.body);
        res.body["user_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("user_id in register response")
    }

    /// Returns the full token response body.
    pub async fn login(&self, username: &str) -> Value {
        let res = self
            .post(
                "/auth/login",
                json!({ "username": username, "password": PASSWORD }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "login: {}", res.body);
        res.body
    }

    pub async fn access_token(&self, username: &str) -> String {
        self.login(username).await["access_token"]
            .as_str()
            .expect("access_token")
            .to_string()
    }

    /// Registers the bootstrap admin and returns an access token for them.
    pub async fn admin_token(&self) -> String {
        self.register(ADMIN_USERNAME).await;
        self.access_token(ADMIN_USERNAME).await
    }

    pub fn last_email_token(&self, username: &str, purpose: TokenPurpose) -> String {
        self.notifier
            .last_token(&format!("{}@example.com", username), purpose)
            .expect("notification was sent")
    }
}
