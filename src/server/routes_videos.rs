//! Video routes: upload, metadata, stream tokens and package delivery.
//!
//! Package files are only reachable through `/videos/:id/package/:name`,
//! where the name is checked against the manifest and the caller's preview
//! window before any bytes leave the disk.

use std::sync::OnceLock;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use gatehouse_common::{Error, VideoId};
use gatehouse_db::models::{PackageState, Video};
use gatehouse_db::pool::get_conn;
use gatehouse_db::queries::videos::{self, NewVideo};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{AppContext, AppError};
use crate::access::caller::{resolve_session, resolve_signed, session_token};
use crate::access::{evaluate, Access, Admin, Caller, Subject};
use crate::streaming::{determine_content_type, serve_file, ByteLimit};
use crate::video::{ByteWindow, Package, PackageEntry, PreviewInfo, PreviewWindow};
use gatehouse_common::storage::MANIFEST_NAME;

/// Create video routes.
pub fn video_routes() -> Router<AppContext> {
    Router::new()
        .route("/videos", post(upload_video))
        .route("/videos/:id", get(get_video))
        .route("/videos/:id/token", post(issue_token))
        .route("/videos/:id/reprocess", post(reprocess_video))
        .route("/videos/:id/package/:name", get(serve_package))
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct VideoUploadQuery {
    pub title: String,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub preview_seconds: u32,
    /// Container extension of the upload.
    #[serde(default = "default_format")]
    pub format: String,
    pub watermark: Option<String>,
    pub duration_seconds: Option<f64>,
}

fn default_format() -> String {
    "mp4".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PackageQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    pub id: VideoId,
    pub package_state: PackageState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    pub id: VideoId,
    pub title: String,
    pub is_premium: bool,
    pub preview_seconds: u32,
    pub duration_seconds: Option<f64>,
    pub package_state: PackageState,
    /// Package currently playing; a rebuild may be in flight alongside it.
    pub served_package: Option<PackageState>,
    pub encrypted: bool,
    pub has_thumbnail: bool,
    pub created_at: DateTime<Utc>,
    pub preview: PreviewInfo,
    /// Present once the package can be served.
    pub manifest_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub manifest_url: String,
}

// ============================================================================
// Helpers
// ============================================================================

fn format_pattern() -> &'static Regex {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,5}$").expect("format pattern is valid"))
}

fn parse_video_id(id: &str) -> Result<VideoId, Error> {
    id.parse().map_err(|_| Error::not_found("video", id))
}

/// Load an active video. Malformed, unknown and inactive IDs all read as 404.
fn load_video(ctx: &AppContext, id: VideoId) -> Result<Video, Error> {
    let conn = get_conn(&ctx.db)?;
    videos::get_video(&conn, id)?
        .filter(|v| v.is_active)
        .ok_or_else(|| Error::not_found("video", id))
}

/// Preview policy over seconds. An unknown duration leaves the total open
/// so the preview limit always applies.
fn access_for(ctx: &AppContext, video: &Video, caller: &Caller) -> Access {
    let total = video
        .duration_seconds
        .filter(|d| d.is_finite() && *d > 0.0)
        .map_or(u32::MAX, |d| d.ceil() as u32);
    let subject = Subject {
        active: video.is_active,
        premium: video.is_premium,
        preview_limit: video.preview_seconds,
        total,
    };
    evaluate(
        &subject,
        caller.viewer(),
        ctx.config.access.anonymous_preview_seconds,
    )
}

fn package_url(id: VideoId, name: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("/videos/{id}/package/{name}?token={token}"),
        None => format!("/videos/{id}/package/{name}"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Upload a video (admin only). The package build runs in the background.
async fn upload_video(
    State(ctx): State<AppContext>,
    Admin(admin): Admin,
    Query(query): Query<VideoUploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if query.title.trim().is_empty() {
        return Err(Error::validation("title is required").into());
    }
    if !format_pattern().is_match(&query.format) {
        return Err(Error::validation(format!("unsupported format '{}'", query.format)).into());
    }
    if query.premium && query.preview_seconds == 0 {
        return Err(Error::validation("preview_seconds must be positive for a premium video").into());
    }
    if query.duration_seconds.is_some_and(|d| !d.is_finite() || d <= 0.0) {
        return Err(Error::validation("duration_seconds must be positive").into());
    }
    if body.is_empty() {
        return Err(Error::MalformedSource("empty upload".into()).into());
    }

    let id = VideoId::new();
    let format = query.format.to_lowercase();
    let dir = ctx.storage.video_dir(id);
    tokio::fs::create_dir_all(&dir).await?;
    if let Err(e) = tokio::fs::write(ctx.storage.video_original(id, &format), &body).await {
        let _ = tokio::fs::remove_dir_all(&dir).await;
        return Err(e.into());
    }

    let watermark = query.watermark.as_deref().map(str::trim).filter(|w| !w.is_empty());
    let storage_path = dir.to_string_lossy();
    let created = {
        let conn = get_conn(&ctx.db)?;
        videos::create_video(
            &conn,
            &NewVideo {
                id,
                title: query.title.trim(),
                source_format: &format,
                is_premium: query.premium,
                preview_seconds: query.preview_seconds,
                duration_seconds: query.duration_seconds,
                watermark_text: watermark,
                storage_path: &storage_path,
            },
        )
    };
    let video = match created {
        Ok(video) => video,
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e.into());
        }
    };

    ctx.videos.enqueue(video.id)?;
    tracing::info!(
        video_id = %video.id,
        bytes = body.len(),
        admin = %admin.username,
        "Video uploaded and queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            id: video.id,
            package_state: video.package_state,
        }),
    ))
}

/// Video metadata with the caller's preview window.
async fn get_video(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<VideoView>, AppError> {
    let video = load_video(&ctx, parse_video_id(&id)?)?;
    let window = PreviewWindow::from_access(access_for(&ctx, &video, &caller))
        .ok_or_else(|| Error::not_found("video", &id))?;

    let manifest_url = video
        .is_servable()
        .then(|| package_url(video.id, MANIFEST_NAME, None));

    Ok(Json(VideoView {
        id: video.id,
        title: video.title,
        is_premium: video.is_premium,
        preview_seconds: video.preview_seconds,
        duration_seconds: video.duration_seconds,
        package_state: video.package_state,
        served_package: video.served_package,
        encrypted: video.encrypted,
        has_thumbnail: video.has_thumbnail,
        created_at: video.created_at,
        preview: window.info(video.duration_seconds),
        manifest_url,
    }))
}

/// Issue a signed stream token bound to this video and the session's user.
async fn issue_token(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    let (member, _) = caller.require_session()?;
    let video = load_video(&ctx, parse_video_id(&id)?)?;

    let expires_at = Utc::now() + chrono::Duration::seconds(ctx.config.server.token_ttl_secs as i64);
    let token = ctx.signer.issue(video.id, member.user.id, expires_at)?;
    let manifest_url = package_url(video.id, MANIFEST_NAME, Some(&token));

    Ok(Json(TokenResponse {
        token,
        expires_at,
        manifest_url,
    }))
}

/// Queue a package rebuild (admin only).
async fn reprocess_video(
    State(ctx): State<AppContext>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_video_id(&id)?;
    {
        let conn = get_conn(&ctx.db)?;
        if videos::get_video(&conn, id)?.is_none() {
            return Err(Error::not_found("video", id).into());
        }
        if !videos::request_reprocess(&conn, id)? {
            return Err(Error::NotReady("video is already queued or processing".into()).into());
        }
    }
    ctx.videos.enqueue(id)?;
    tracing::info!(video_id = %id, "Video re-queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            id,
            package_state: PackageState::Pending,
        }),
    ))
}

/// Serve the manifest, a segment or the key.
async fn serve_package(
    State(ctx): State<AppContext>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<PackageQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let video_id = parse_video_id(&id)?;

    let (video, caller) = {
        let conn = get_conn(&ctx.db)?;
        let now = Utc::now();
        let caller = match (&query.token, session_token(&headers)) {
            (Some(token), _) => resolve_signed(&conn, &ctx.signer, token, video_id, now)?,
            (None, Some(session)) => resolve_session(&conn, &session, now)?,
            (None, None) => Caller::Anonymous,
        };
        let video = videos::get_video(&conn, video_id)?
            .filter(|v| v.is_active)
            .ok_or_else(|| Error::not_found("video", video_id))?;
        (video, caller)
    };

    if !video.is_servable() {
        return Err(Error::NotReady(format!("video package is {}", video.package_state)).into());
    }
    let window = PreviewWindow::from_access(access_for(&ctx, &video, &caller))
        .ok_or_else(|| Error::not_found("video", video_id))?;

    let package = Package::open(&ctx.storage.package_dir(video_id)).await?;
    let duration = video
        .duration_seconds
        .or_else(|| Some(package.playlist().duration()).filter(|d| *d > 0.0));

    match package.resolve(&name) {
        Some(PackageEntry::Manifest) => {
            let token = query.token.as_deref();
            let body = window
                .manifest(package.playlist())
                .render(|uri| package_url(video_id, uri, token));
            Ok((
                [
                    (header::CONTENT_TYPE, determine_content_type("m3u8")),
                    (header::CACHE_CONTROL, "private, no-store"),
                ],
                body,
            )
                .into_response())
        }
        Some(PackageEntry::Key) => {
            let path = package
                .path_of(&name)
                .ok_or_else(|| Error::not_found("package file", &name))?;
            Ok(serve_file(&path, "application/octet-stream", &headers, None).await?)
        }
        Some(PackageEntry::Segment { segment, .. }) => {
            if !window.allows(segment) {
                return Err(Error::AccessDenied(window.upgrade(package.playlist(), duration)).into());
            }
            let path = package
                .path_of(&name)
                .ok_or_else(|| Error::not_found("package file", &name))?;
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let content_type = determine_content_type(ext);

            let limit = if package.is_single_file() {
                let size = tokio::fs::metadata(&path).await?.len();
                match window.byte_window(size, duration) {
                    ByteWindow::Unlimited => None,
                    ByteWindow::Prefix(bytes) => Some(ByteLimit {
                        bytes,
                        denial: window.upgrade(package.playlist(), duration),
                    }),
                    ByteWindow::Closed => {
                        return Err(Error::AccessDenied(window.upgrade(package.playlist(), duration)).into())
                    }
                }
            } else {
                None
            };

            Ok(serve_file(&path, content_type, &headers, limit).await?)
        }
        None => Err(Error::not_found("package file", name).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_accepts_short_alphanumerics_only() {
        assert!(format_pattern().is_match("mp4"));
        assert!(format_pattern().is_match("WEBM"));
        assert!(!format_pattern().is_match("../x"));
        assert!(!format_pattern().is_match("toolong"));
        assert!(!format_pattern().is_match(""));
    }

    #[test]
    fn package_urls_carry_the_token() {
        let id = VideoId::new();
        assert_eq!(
            package_url(id, "segment_000.ts", Some("abc.def")),
            format!("/videos/{id}/package/segment_000.ts?token=abc.def")
        );
        assert_eq!(
            package_url(id, "index.m3u8", None),
            format!("/videos/{id}/package/index.m3u8")
        );
    }
}
