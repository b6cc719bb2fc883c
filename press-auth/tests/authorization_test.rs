//! Policy enforcement and the admin surface.

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN_USERNAME};
use serde_json::json;

#[tokio::test]
async fn admin_routes_require_authentication_and_permission() {
    let app = TestApp::spawn().await;
    app.register("alice").await;
    let user_token = app.access_token("alice").await;

    let anonymous = app.request(Method::GET, "/policies", None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let user = app
        .request(Method::GET, "/policies", Some(&user_token), None)
        .await;
    assert_eq!(user.status, StatusCode::FORBIDDEN);

    let admin_token = app.admin_token().await;
    let admin = app
        .request(Method::GET, "/policies", Some(&admin_token), None)
        .await;
    assert_eq!(admin.status, StatusCode::OK);
    assert!(admin.body.as_array().is_some_and(|p| p
        .iter()
        .any(|p| p["role"] == "admin" && p["resource"] == "*" && p["action"] == "*")));
}

#[tokio::test]
async fn bootstrap_admin_is_granted_admin_role() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;

    let me = app
        .request(Method::GET, "/auth/me", Some(&admin_token), None)
        .await;

    assert_eq!(me.body["username"], ADMIN_USERNAME);
    let roles = me.body["roles"].as_array().expect("roles");
    assert!(roles.iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn granting_a_policy_takes_effect_immediately() {
    // Arrange
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;
    let editor_id = app.register("eddie").await;
    let editor_token = app.access_token("eddie").await;

    let assigned = app
        .request(
            Method::POST,
            &format!("/users/{}/roles", editor_id),
            Some(&admin_token),
            Some(json!({ "role": "editor" })),
        )
        .await;
    assert_eq!(assigned.status, StatusCode::CREATED);

    let denied = app
        .request(Method::GET, "/signing-keys", Some(&editor_token), None)
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    // Act
    let granted = app
        .request(
            Method::POST,
            "/policies",
            Some(&admin_token),
            Some(json!({ "role": "editor", "resource": "/signing-keys", "action": "GET" })),
        )
        .await;
    assert_eq!(granted.status, StatusCode::CREATED);
    assert_eq!(granted.body["changed"], true);

    // Assert
    let allowed = app
        .request(Method::GET, "/signing-keys", Some(&editor_token), None)
        .await;
    assert_eq!(allowed.status, StatusCode::OK);

    let other_action = app
        .request(
            Method::POST,
            "/signing-keys/rotate",
            Some(&editor_token),
            None,
        )
        .await;
    assert_eq!(other_action.status, StatusCode::FORBIDDEN);

    let again = app
        .request(
            Method::POST,
            "/policies",
            Some(&admin_token),
            Some(json!({ "role": "editor", "resource": "/signing-keys", "action": "GET" })),
        )
        .await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body["changed"], false);

    let removed = app
        .request(
            Method::DELETE,
            "/policies",
            Some(&admin_token),
            Some(json!({ "role": "editor", "resource": "/signing-keys", "action": "GET" })),
        )
        .await;
    assert_eq!(removed.body["changed"], true);

    let denied_again = app
        .request(Method::GET, "/signing-keys", Some(&editor_token), None)
        .await;
    assert_eq!(denied_again.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn path_parameters_are_ignored_when_matching() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;
    let support_id = app.register("sam").await;
    let support_token = app.access_token("sam").await;

    app.request(
        Method::POST,
        &format!("/users/{}/roles", support_id),
        Some(&admin_token),
        Some(json!({ "role": "support" })),
    )
    .await;
    app.request(
        Method::POST,
        "/policies",
        Some(&admin_token),
        Some(json!({ "role": "support", "resource": "/users/{id}/roles", "action": "GET" })),
    )
    .await;

    let res = app
        .request(
            Method::GET,
            &format!("/users/{}/roles", support_id),
            Some(&support_token),
            None,
        )
        .await;

    assert_eq!(res.status, StatusCode::OK);
    let roles: Vec<&str> = res.body["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .filter_map(|a| a["role"].as_str())
        .collect();
    assert!(roles.contains(&"support"));
    assert!(roles.contains(&"user"));
}

#[tokio::test]
async fn domain_scoped_assignment_applies_only_in_its_domain() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;
    let user_id = app.register("dora").await;
    let user_token = app.access_token("dora").await;

    app.request(
        Method::POST,
        &format!("/users/{}/roles", user_id),
        Some(&admin_token),
        Some(json!({ "role": "auditor", "domain": "tenant-a" })),
    )
    .await;
    app.request(
        Method::POST,
        "/policies",
        Some(&admin_token),
        Some(json!({ "role": "auditor", "resource": "/policies/stats", "action": "GET" })),
    )
    .await;

    let in_domain = app
        .state
        .policy
        .enforce_subject(user_id, "/policies/stats", "GET", Some("tenant-a"))
        .expect("model loaded");
    let other_domain = app
        .state
        .policy
        .enforce_subject(user_id, "/policies/stats", "GET", Some("tenant-b"))
        .expect("model loaded");
    assert!(in_domain);
    assert!(!other_domain);

    let without_header = app
        .request(Method::GET, "/policies/stats", Some(&user_token), None)
        .await;
    assert_eq!(without_header.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn policy_update_and_role_deletion() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;

    app.request(
        Method::POST,
        "/policies",
        Some(&admin_token),
        Some(json!({ "role": "editor", "resource": "/posts", "action": "GET" })),
    )
    .await;

    let updated = app
        .request(
            Method::PUT,
            "/policies",
            Some(&admin_token),
            Some(json!({
                "old": { "role": "editor", "resource": "/posts", "action": "GET" },
                "new": { "role": "editor", "resource": "/posts", "action": "DELETE" },
            })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::NO_CONTENT);

    let missing = app
        .request(
            Method::PUT,
            "/policies",
            Some(&admin_token),
            Some(json!({
                "old": { "role": "editor", "resource": "/posts", "action": "GET" },
                "new": { "role": "editor", "resource": "/posts", "action": "PUT" },
            })),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let listed = app
        .request(Method::GET, "/policies?role=editor", Some(&admin_token), None)
        .await;
    assert_eq!(listed.body.as_array().map(Vec::len), Some(1));
    assert_eq!(listed.body[0]["action"], "DELETE");

    let deleted = app
        .request(Method::DELETE, "/roles/editor", Some(&admin_token), None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body["count"], 1);

    let invalid = app
        .request(Method::DELETE, "/roles/Not%20A%20Role", Some(&admin_token), None)
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;

    let backup = app
        .request(Method::GET, "/policies/backup", Some(&admin_token), None)
        .await;
    assert_eq!(backup.status, StatusCode::OK);

    app.request(
        Method::POST,
        "/policies",
        Some(&admin_token),
        Some(json!({ "role": "editor", "resource": "/posts", "action": "GET" })),
    )
    .await;

    let restored = app
        .request(
            Method::POST,
            "/policies/restore",
            Some(&admin_token),
            Some(backup.body.clone()),
        )
        .await;
    assert_eq!(restored.status, StatusCode::OK);

    let editor = app
        .request(Method::GET, "/policies?role=editor", Some(&admin_token), None)
        .await;
    assert_eq!(editor.body.as_array().map(Vec::len), Some(0));

    let stats = app
        .request(Method::GET, "/policies/stats", Some(&admin_token), None)
        .await;
    assert_eq!(stats.body["total_rules"], restored.body["count"]);
}

#[tokio::test]
async fn invalid_policy_is_rejected() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;

    let res = app
        .request(
            Method::POST,
            "/policies",
            Some(&admin_token),
            Some(json!({ "role": "Editor", "resource": "posts", "action": "" })),
        )
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["details"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn forced_logout_revokes_refresh_tokens() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;
    let user_id = app.register("alice").await;
    let session = app.login("alice").await;

    let res = app
        .request(
            Method::POST,
            &format!("/users/{}/logout", user_id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["count"], 1);

    let refresh = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": session["refresh_token"] }),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::BAD_REQUEST);

    let unknown = app
        .request(
            Method::POST,
            &format!("/users/{}/logout", uuid::Uuid::new_v4()),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signing_key_rotation_keeps_old_tokens_valid_until_deactivated() {
    let app = TestApp::spawn().await;
    let admin_token = app.admin_token().await;
    app.register("alice").await;
    let old_token = app.access_token("alice").await;

    let keys = app
        .request(Method::GET, "/signing-keys", Some(&admin_token), None)
        .await;
    let old_key_id = keys.body[0]["key_id"].as_str().expect("key_id").to_string();

    let only_key = app
        .request(
            Method::DELETE,
            &format!("/signing-keys/{}", old_key_id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(only_key.status, StatusCode::CONFLICT);

    app.clock.advance(chrono::Duration::minutes(1));
    let rotated = app
        .request(
            Method::POST,
            "/signing-keys/rotate",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(rotated.status, StatusCode::CREATED);

    let still_valid = app
        .request(Method::GET, "/auth/me", Some(&old_token), None)
        .await;
    assert_eq!(still_valid.status, StatusCode::OK);

    // The admin's own token was signed by the old key.
    let admin_token = app.access_token(ADMIN_USERNAME).await;
    let deactivated = app
        .request(
            Method::DELETE,
            &format!("/signing-keys/{}", old_key_id),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(deactivated.status, StatusCode::NO_CONTENT);

    let revoked = app
        .request(Method::GET, "/auth/me", Some(&old_token), None)
        .await;
    assert_eq!(revoked.status, StatusCode::UNAUTHORIZED);
}
