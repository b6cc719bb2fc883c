//! Password reset over HTTP.

mod common;

use axum::http::StatusCode;
use common::{TestApp, PASSWORD};
use press_auth::models::TokenPurpose;
use serde_json::json;

#[tokio::test]
async fn reset_request_does_not_reveal_registration() {
    let app = TestApp::spawn().await;
    app.register("alice").await;

    let known = app
        .post(
            "/auth/request-password-reset",
            json!({ "email": "alice@example.com" }),
        )
        .await;
    let unknown = app
        .post(
            "/auth/request-password-reset",
            json!({ "email": "nobody@example.com" }),
        )
        .await;

    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(known.body, unknown.body);
    assert!(app
        .notifier
        .last_token("nobody@example.com", TokenPurpose::PasswordReset)
        .is_none());
}

#[tokio::test]
async fn reset_changes_password_and_revokes_sessions() {
    // Arrange
    let app = TestApp::spawn().await;
    app.register("alice").await;
    let session = app.login("alice").await;
    app.post(
        "/auth/request-password-reset",
        json!({ "email": "alice@example.com" }),
    )
    .await;
    let token = app.last_email_token("alice", TokenPurpose::PasswordReset);

    // Act
    let res = app
        .post(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "brand-new-pass-7" }),
        )
        .await;

    // Assert
    assert_eq!(res.status, StatusCode::OK);

    let old_refresh = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": session["refresh_token"] }),
        )
        .await;
    assert_eq!(old_refresh.status, StatusCode::BAD_REQUEST);

    let old_password = app
        .post(
            "/auth/login",
            json!({ "username": "alice", "password": PASSWORD }),
        )
        .await;
    assert_eq!(old_password.status, StatusCode::UNAUTHORIZED);

    let new_password = app
        .post(
            "/auth/login",
            json!({ "username": "alice@example.com", "password": "brand-new-pass-7" }),
        )
        .await;
    assert_eq!(new_password.status, StatusCode::OK);

    let replay = app
        .post(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "another-pass-8" }),
        )
        .await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weak_password_does_not_consume_reset_token() {
    let app = TestApp::spawn().await;
    app.register("alice").await;
    app.post(
        "/auth/request-password-reset",
        json!({ "email": "alice@example.com" }),
    )
    .await;
    let token = app.last_email_token("alice", TokenPurpose::PasswordReset);

    let weak = app
        .post(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "password" }),
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);

    let strong = app
        .post(
            "/auth/reset-password",
            json!({ "token": token, "new_password": "brand-new-pass-7" }),
        )
        .await;
    assert_eq!(strong.status, StatusCode::OK);
}
