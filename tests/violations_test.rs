//! Integration tests for the violation ledger and lockout.

mod common;

use axum::body::Body;
use axum::http::{header, Method, StatusCode};
use common::{request, TestHarness};
use serde_json::json;
use uuid::Uuid;

fn report(user_id: impl std::fmt::Display, resource_id: Uuid, kind: &str) -> serde_json::Value {
    json!({
        "type": kind,
        "userId": user_id.to_string(),
        "resourceId": resource_id,
        "timestamp": "2026-01-05T10:00:00Z",
    })
}

#[tokio::test]
async fn third_strike_locks_the_user_out() {
    let h = TestHarness::new();
    let reader = h.create_user("reader", false, true);
    let session = h.session(&reader);
    let other_session = h.session(&reader);
    let resource = Uuid::new_v4();

    let first = h
        .post_json("/violations", Some(&session), report(reader.id, resource, "screenshot"))
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    let json = first.json();
    assert_eq!(json["sequenceNumber"], 1);
    assert_eq!(json["state"], "warned");
    assert_eq!(json["logout"], false);

    let second = h
        .post_json("/violations", Some(&session), report(reader.id, resource, "dev_tools"))
        .await
        .json();
    assert_eq!(second["sequenceNumber"], 2);

    let third = h
        .post_json(
            "/violations",
            Some(&session),
            report(reader.id, resource, "visibility_cycling"),
        )
        .await;
    assert_eq!(third.status, StatusCode::CREATED);
    let cookie = third.header("set-cookie").unwrap().to_string();
    assert!(cookie.starts_with("gatehouse_session="));
    let json = third.json();
    assert_eq!(json["sequenceNumber"], 3);
    assert_eq!(json["state"], "locked");
    assert_eq!(json["logout"], true);
    assert_eq!(json["redirect"], "/login");

    let fourth = h
        .post_json("/violations", Some(&session), report(reader.id, resource, "screenshot"))
        .await;
    assert_eq!(fourth.status, StatusCode::UNAUTHORIZED);

    // Every session of the user is gone, not just the reporting one.
    let status = h.get("/auth/status", Some(&other_session)).await.json();
    assert_eq!(status["authenticated"], false);
}

#[tokio::test]
async fn sequences_are_per_session() {
    let h = TestHarness::new();
    let reader = h.create_user("reader", false, false);
    let laptop = h.session(&reader);
    let phone = h.session(&reader);
    let resource = Uuid::new_v4();

    for token in [&laptop, &phone] {
        let json = h
            .post_json("/violations", Some(token), report(reader.id, resource, "screenshot"))
            .await
            .json();
        assert_eq!(json["sequenceNumber"], 1);
    }
}

#[tokio::test]
async fn reports_are_checked() {
    let h = TestHarness::new();
    let reader = h.create_user("reader", false, false);
    let someone = h.create_user("someone", false, false);
    let session = h.session(&reader);
    let resource = Uuid::new_v4();

    let resp = h
        .post_json("/violations", None, report(reader.id, resource, "screenshot"))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = h
        .post_json("/violations", Some(&session), report(someone.id, resource, "screenshot"))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = h
        .post_json("/violations", Some(&session), report(reader.id, resource, "keylogger"))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admins_list_and_acknowledge_violations() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let reader = h.create_user("reader", false, false);
    let session = h.session(&reader);
    let resource = Uuid::new_v4();

    for _ in 0..3 {
        h.post_json("/violations", Some(&session), report(reader.id, resource, "screenshot"))
            .await;
    }

    let resp = h.get("/violations", Some(&session)).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let all = h.get("/violations", Some(&admin)).await.json();
    assert_eq!(all.as_array().unwrap().len(), 3);

    let critical = h.get("/violations?filter=critical", Some(&admin)).await.json();
    let critical = critical.as_array().unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0]["sequenceNumber"], 3);
    let id = critical[0]["id"].as_i64().unwrap();

    for _ in 0..2 {
        let req = request(Method::PATCH, &format!("/violations/{id}"), Some(&admin), Body::empty());
        let resp = h.send(req).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["notified"], true);
    }

    let unnotified = h.get("/violations?filter=unnotified", Some(&admin)).await.json();
    assert_eq!(unnotified.as_array().unwrap().len(), 2);

    let req = request(Method::PATCH, "/violations/9999", Some(&admin), Body::empty());
    assert_eq!(h.send(req).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cookie_sessions_can_report() {
    let h = TestHarness::new();
    let reader = h.create_user("reader", false, false);
    let session = h.session(&reader);

    let mut req = request(
        Method::POST,
        "/violations",
        None,
        Body::from(report(reader.id, Uuid::new_v4(), "screenshot").to_string()),
    );
    req.headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    req.headers_mut()
        .insert(header::COOKIE, format!("gatehouse_session={session}").parse().unwrap());
    assert_eq!(h.send(req).await.status, StatusCode::CREATED);
}

#[tokio::test]
async fn reports_without_a_timestamp_use_the_server_clock() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let reader = h.create_user("reader", false, false);
    let session = h.session(&reader);

    let body = json!({
        "type": "devtools",
        "userId": reader.id.to_string(),
        "resourceId": Uuid::new_v4(),
    });
    let resp = h.post_json("/violations", Some(&session), body).await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let entries = h.get("/violations", Some(&admin)).await.json();
    assert_eq!(entries[0]["kind"], "dev_tools");
    assert!(entries[0]["occurredAt"].is_string());

    let resp = h
        .post_json("/violations", Some(&session), json!({"type": "screenshot"}))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}
