//! Integration tests for document upload, unit delivery and page images.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn preview_boundary_for_unentitled_member() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 50, true, 3).await;

    let reader = h.create_user("reader", false, false);
    let token = h.session(&reader);

    for n in 1..=3 {
        let resp = h.get(&format!("/resources/{id}/unit/{n}"), Some(&token)).await;
        assert_eq!(resp.status, StatusCode::OK, "unit {n}");
        assert_eq!(resp.header("content-type"), Some("application/pdf"));
        assert_eq!(resp.header("x-page-number"), Some(n.to_string().as_str()));
        assert_eq!(resp.header("x-total-pages"), Some("50"));
        assert!(resp.body.starts_with(b"%PDF"));
    }

    let resp = h.get(&format!("/resources/{id}/unit/4"), Some(&token)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    let json = resp.json();
    assert_eq!(json["code"], "upgrade_required");
    assert_eq!(json["upgradeRequired"], true);
    assert_eq!(json["availableUnits"], 3);
    assert_eq!(json["totalUnits"], 50);
}

#[tokio::test]
async fn entitled_member_sees_everything() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 5, true, 1).await;

    let subscriber = h.create_user("subscriber", false, true);
    let token = h.session(&subscriber);

    let resp = h.get(&format!("/resources/{id}/unit/5"), Some(&token)).await;
    assert_eq!(resp.status, StatusCode::OK);

    let meta = h.get(&format!("/resources/{id}"), Some(&token)).await.json();
    assert_eq!(meta["access"]["fullAccess"], true);
    assert_eq!(meta["access"]["availableUnits"], 5);
}

#[tokio::test]
async fn non_premium_units_and_out_of_range() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 4, false, 0).await;

    let reader = h.create_user("reader", false, false);
    let token = h.session(&reader);

    for n in 1..=4 {
        let resp = h.get(&format!("/resources/{id}/unit/{n}"), Some(&token)).await;
        assert_eq!(resp.status, StatusCode::OK, "unit {n}");
    }
    for n in [0, 5] {
        let resp = h.get(&format!("/resources/{id}/unit/{n}"), Some(&token)).await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND, "unit {n}");
    }
}

#[tokio::test]
async fn anonymous_viewers_get_the_stricter_preview() {
    let h = TestHarness::with_config(|c| c.access.anonymous_preview_units = 1);
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 6, true, 3).await;

    assert_eq!(h.get(&format!("/resources/{id}/unit/1"), None).await.status, StatusCode::OK);
    let resp = h.get(&format!("/resources/{id}/unit/2"), None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.json()["availableUnits"], 1);
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = TestHarness::new();
    let resp = h.get("/resources/not-a-uuid/unit/1", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = h
        .get(&format!("/resources/{}/unit/1", uuid::Uuid::new_v4()), None)
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_requires_admin_and_a_real_pdf() {
    let h = TestHarness::new();
    let reader = h.create_user("reader", false, false);
    let token = h.session(&reader);
    let pdf = gatehouse_media::document::sample::sample_pdf(2);

    let resp = h.post_bytes("/resources?title=x", None, pdf.clone()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    let resp = h.post_bytes("/resources?title=x", Some(&token), pdf).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let admin = h.admin_session();
    let resp = h
        .post_bytes("/resources?title=x", Some(&admin), b"not a pdf".to_vec())
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);

    let pdf = gatehouse_media::document::sample::sample_pdf(2);
    let resp = h
        .post_bytes("/resources?title=x&premium=true&preview_units=5", Some(&admin), pdf)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn page_images_are_rendered_once_then_cached() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 3, false, 0).await;

    let first = h.get(&format!("/resources/{id}/image/2"), None).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("content-type"), Some("image/jpeg"));
    assert_eq!(first.header("x-raster-method"), Some("solid"));
    assert_eq!(first.header("x-page-number"), Some("2"));

    let second = h.get(&format!("/resources/{id}/image/2"), None).await;
    assert_eq!(second.header("x-raster-method"), Some("cache"));
    assert_eq!(second.body, first.body);
    assert_eq!(h.raster.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn page_images_respect_the_preview() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 10, true, 2).await;
    let reader = h.create_user("reader", false, false);
    let token = h.session(&reader);

    let resp = h.get(&format!("/resources/{id}/image/3"), Some(&token)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(h.raster.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_image_requests_render_once() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 1, false, 0).await;

    let uri = format!("/resources/{id}/image/1");
    let requests = (0..8).map(|_| h.get(&uri, None));
    let responses = futures::future::join_all(requests).await;
    assert!(responses.iter().all(|r| r.status == StatusCode::OK));
    assert_eq!(h.raster.calls.load(Ordering::SeqCst), 1);

    let cache = h.ctx.storage.cache_dir(id);
    let files: Vec<_> = std::fs::read_dir(&cache)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["page-0001.jpg".to_string()]);
}

#[tokio::test]
async fn convert_to_images_is_idempotent() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 4, false, 0).await;
    let uri = format!("/resources/{id}/convert-to-images");

    let first = h.post_bytes(&uri, Some(&admin), Vec::new()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json()["converted"], 4);

    let mtime = |n: u32| {
        std::fs::metadata(h.ctx.storage.canonical_raster(id, n))
            .unwrap()
            .modified()
            .unwrap()
    };
    let before: Vec<_> = (1..=4).map(mtime).collect();

    let second = h.post_bytes(&uri, Some(&admin), Vec::new()).await.json();
    assert_eq!(second["converted"], 0);
    assert_eq!(second["skipped"], 4);
    assert_eq!(second["failed"], 0);
    let after: Vec<_> = (1..=4).map(mtime).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn missing_unit_file_is_409_for_that_unit_only() {
    let h = TestHarness::new();
    let admin = h.admin_session();
    let id = h.upload_pdf(&admin, 4, false, 0).await;
    std::fs::remove_file(h.ctx.storage.unit_source(id, 2)).unwrap();

    let resp = h.get(&format!("/resources/{id}/unit/2"), Some(&admin)).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.json()["code"], "resource_not_ready");

    let resp = h.get(&format!("/resources/{id}/unit/1"), Some(&admin)).await;
    assert_eq!(resp.status, StatusCode::OK);

    std::fs::remove_file(h.ctx.storage.ready_marker(id)).unwrap();
    let resp = h.get(&format!("/resources/{id}/unit/1"), Some(&admin)).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    let resp = h
        .post_bytes(&format!("/resources/{id}/convert-to-images"), Some(&admin), Vec::new())
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
}
