//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over an
//! in-memory database and a temporary data directory. External tools are
//! replaced by fakes: a raster method that draws a solid JPEG and a
//! transcoder that writes a three-segment package (or fails, to force the
//! passthrough path).

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use gatehouse::config::Config;
use gatehouse::server::{create_router, AppContext};
use gatehouse::video::Transcoder;
use gatehouse_av::{HlsOptions, RasterMethod, RasterOptions};
use gatehouse_common::storage::{KEY_NAME, MANIFEST_NAME};
use gatehouse_common::{ResourceId, VideoId};
use gatehouse_db::models::{PackageState, SubscriptionStatus, User};
use gatehouse_db::pool::{init_memory_pool, DbPool};
use gatehouse_db::queries::{auth_tokens, users, videos};

pub const PASSWORD: &str = "correct-horse";

/// Raster method that draws a small grey JPEG and counts its calls.
#[derive(Default)]
pub struct SolidRaster {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RasterMethod for SolidRaster {
    fn name(&self) -> &str {
        "solid"
    }

    async fn render(&self, _source: &Path, _options: &RasterOptions) -> gatehouse_av::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([128, 128, 128]));
        gatehouse_av::raster::encode_jpeg(&img)
    }
}

/// Writes three 6-second encrypted segments, or fails like a missing ffmpeg.
pub struct FakeTranscoder {
    pub hls_works: bool,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe_duration(&self, _input: &Path) -> gatehouse_av::Result<Option<f64>> {
        Ok(None)
    }

    async fn package_hls(
        &self,
        _input: &Path,
        out_dir: &Path,
        options: &HlsOptions,
    ) -> gatehouse_av::Result<()> {
        if !self.hls_works {
            return Err(gatehouse_av::Error::tool_not_found("ffmpeg"));
        }
        tokio::fs::create_dir_all(out_dir).await?;
        let mut manifest = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n");
        if options.key.is_some() {
            tokio::fs::write(out_dir.join(KEY_NAME), [9u8; 16]).await?;
            manifest.push_str("#EXT-X-KEY:METHOD=AES-128,URI=\"enc.key\"\n");
        }
        for i in 0..3 {
            let name = format!("segment_{i:03}.ts");
            tokio::fs::write(out_dir.join(&name), vec![i as u8; 376]).await?;
            manifest.push_str(&format!("#EXTINF:6.000000,\n{name}\n"));
        }
        manifest.push_str("#EXT-X-ENDLIST\n");
        tokio::fs::write(out_dir.join(MANIFEST_NAME), manifest).await?;
        Ok(())
    }

    async fn thumbnail(&self, _input: &Path, output: &Path) -> gatehouse_av::Result<()> {
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }
}

/// A response with its body collected.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub raster: Arc<SolidRaster>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        Self::build(configure, true)
    }

    /// Harness whose transcoder always fails, so packages are passthrough.
    pub fn passthrough() -> Self {
        Self::build(|_| {}, false)
    }

    fn build(configure: impl FnOnce(&mut Config), hls_works: bool) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        config.video.workers = 1;
        configure(&mut config);

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let raster = Arc::new(SolidRaster::default());
        let (ctx, _workers) = AppContext::build(
            config,
            db.clone(),
            vec![raster.clone() as Arc<dyn RasterMethod>],
            Arc::new(FakeTranscoder { hls_works }),
            CancellationToken::new(),
        )
        .expect("failed to build context");

        Self {
            ctx,
            db,
            raster,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Create a user with a cheap bcrypt hash.
    pub fn create_user(&self, username: &str, admin: bool, entitled: bool) -> User {
        let hash = bcrypt::hash(PASSWORD, 4).unwrap();
        let conn = self.db.get().unwrap();
        let user = users::create_user(&conn, username, &hash, admin).unwrap();
        if entitled {
            users::set_subscription(&conn, user.id, SubscriptionStatus::Active, None).unwrap();
        }
        users::get_user(&conn, user.id).unwrap().unwrap()
    }

    /// Open a session for `user` and return its token.
    pub fn session(&self, user: &User) -> String {
        let conn = self.db.get().unwrap();
        auth_tokens::create_token(&conn, user.id, chrono::Duration::hours(1))
            .unwrap()
            .token
    }

    pub fn admin_session(&self) -> String {
        let admin = self.create_user("admin", true, true);
        self.session(&admin)
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.send(request(Method::GET, uri, token, Body::empty())).await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, json: serde_json::Value) -> TestResponse {
        let mut req = request(Method::POST, uri, token, Body::from(json.to_string()));
        req.headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        self.send(req).await
    }

    pub async fn post_bytes(&self, uri: &str, token: Option<&str>, body: Vec<u8>) -> TestResponse {
        self.send(request(Method::POST, uri, token, Body::from(body))).await
    }

    /// Upload a sample PDF through the admin route.
    pub async fn upload_pdf(&self, admin: &str, pages: u32, premium: bool, preview: u32) -> ResourceId {
        let pdf = gatehouse_media::document::sample::sample_pdf(pages);
        let uri = format!("/resources?title=Handbook&premium={premium}&preview_units={preview}");
        let resp = self.post_bytes(&uri, Some(admin), pdf).await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.text());
        resp.json()["id"].as_str().unwrap().parse().unwrap()
    }

    /// Upload a video and wait for its package.
    pub async fn upload_video(&self, admin: &str, query: &str) -> VideoId {
        let resp = self
            .post_bytes(&format!("/videos?{query}"), Some(admin), vec![5u8; 4000])
            .await;
        assert_eq!(resp.status, StatusCode::ACCEPTED, "{}", resp.text());
        let id: VideoId = resp.json()["id"].as_str().unwrap().parse().unwrap();
        self.wait_for_package(id).await;
        id
    }

    pub async fn wait_for_package(&self, id: VideoId) -> PackageState {
        for _ in 0..200 {
            let state = {
                let conn = self.db.get().unwrap();
                videos::get_video(&conn, id).unwrap().unwrap().package_state
            };
            if !matches!(state, PackageState::Pending | PackageState::Processing) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("video {id} was never packaged");
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body).unwrap()
}
