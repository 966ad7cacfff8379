//! Integration tests for login, logout, session status and rate limiting.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, PASSWORD};
use serde_json::json;

#[tokio::test]
async fn login_success_sets_cookie_and_returns_token() {
    let h = TestHarness::new();
    h.create_user("testuser", false, true);

    let resp = h
        .post_json(
            "/auth/login",
            None,
            json!({"username": "testuser", "password": PASSWORD}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let cookie = resp.header("set-cookie").unwrap();
    assert!(cookie.starts_with("gatehouse_session="));
    assert!(cookie.contains("HttpOnly"));

    let json = resp.json();
    assert_eq!(json["success"], true);
    assert_eq!(json["user"]["username"], "testuser");
    assert!(json["user"].get("password_hash").is_none());

    let token = json["token"].as_str().unwrap();
    let status = h.get("/auth/status", Some(token)).await.json();
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["username"], "testuser");
    assert_eq!(status["entitled"], true);
    assert_eq!(status["isAdmin"], false);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_are_rejected() {
    let h = TestHarness::new();
    h.create_user("testuser", false, false);

    let resp = h
        .post_json(
            "/auth/login",
            None,
            json!({"username": "testuser", "password": "wrong"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json()["code"], "unauthorized");

    let resp = h
        .post_json(
            "/auth/login",
            None,
            json!({"username": "nobody", "password": PASSWORD}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let h = TestHarness::new();
    let user = h.create_user("testuser", false, false);
    let token = h.session(&user);

    let resp = h.post_bytes("/auth/logout", Some(&token), Vec::new()).await;
    assert_eq!(resp.status, StatusCode::OK);

    let status = h.get("/auth/status", Some(&token)).await.json();
    assert_eq!(status["authenticated"], false);
}

#[tokio::test]
async fn anonymous_status() {
    let h = TestHarness::new();
    let status = h.get("/auth/status", None).await.json();
    assert_eq!(status["authenticated"], false);
    assert!(status["username"].is_null());
}

#[tokio::test]
async fn login_is_rate_limited() {
    let h = TestHarness::with_config(|c| c.server.login_per_minute = 2);
    let body = json!({"username": "nobody", "password": "x"});

    for _ in 0..2 {
        let resp = h.post_json("/auth/login", None, body.clone()).await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }
    let resp = h.post_json("/auth/login", None, body).await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.json()["code"], "rate_limited");
}

#[tokio::test]
async fn subscription_changes_apply_immediately() {
    let h = TestHarness::new();
    let user = h.create_user("testuser", false, false);
    let token = h.session(&user);
    assert_eq!(h.get("/auth/status", Some(&token)).await.json()["entitled"], false);

    {
        let conn = h.db.get().unwrap();
        gatehouse_db::queries::users::set_subscription(
            &conn,
            user.id,
            gatehouse_db::models::SubscriptionStatus::Active,
            None,
        )
        .unwrap();
    }
    assert_eq!(h.get("/auth/status", Some(&token)).await.json()["entitled"], true);
}

#[tokio::test]
async fn health_check() {
    let h = TestHarness::new();
    let resp = h.get("/health", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "healthy");
}
