//! File serving with HTTP range requests and an optional byte ceiling.

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use gatehouse_common::{Error, Result, UpgradeRequired};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Only bytes `0..bytes` may be served; `denial` answers anything past it.
#[derive(Debug, Clone)]
pub struct ByteLimit {
    pub bytes: u64,
    pub denial: UpgradeRequired,
}

/// Serve `path`, honouring `Range` and an optional [`ByteLimit`].
///
/// - no range, no limit: 200 with the whole file
/// - no range, limit below the size: 206 with the allowed prefix
/// - satisfiable range: 206, clamped to the limit; 403 if it starts past it
/// - unsatisfiable range: 416
pub async fn serve_file(
    path: &Path,
    content_type: &str,
    headers: &HeaderMap,
    limit: Option<ByteLimit>,
) -> Result<Response> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("file", path.display()))
        }
        Err(e) => return Err(e.into()),
    };
    let file_size = metadata.len();

    let range_header = headers.get(header::RANGE).and_then(|h| h.to_str().ok());

    let (start, end) = match range_header {
        Some(raw) => match parse_range_header(raw, file_size) {
            Some(range) => range,
            None => return unsatisfiable(file_size),
        },
        None => match &limit {
            Some(limit) if limit.bytes < file_size => (0, limit.bytes.saturating_sub(1)),
            _ => return full_response(path, content_type, file_size).await,
        },
    };

    let end = match &limit {
        Some(limit) if start >= limit.bytes => {
            return Err(Error::AccessDenied(limit.denial.clone()))
        }
        Some(limit) => end.min(limit.bytes - 1),
        None => end,
    };

    partial_response(path, content_type, start, end, file_size).await
}

async fn full_response(path: &Path, content_type: &str, file_size: u64) -> Result<Response> {
    let file = File::open(path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "private, no-store")
        .body(body)
        .map_err(|e| Error::internal(e.to_string()))
}

async fn partial_response(
    path: &Path,
    content_type: &str,
    start: u64,
    end: u64,
    file_size: u64,
) -> Result<Response> {
    let length = end - start + 1;

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let stream = ReaderStream::new(file.take(length));
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_size),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "private, no-store")
        .body(body)
        .map_err(|e| Error::internal(e.to_string()))
}

fn unsatisfiable(file_size: u64) -> Result<Response> {
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_RANGE, format!("bytes */{}", file_size))
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .map_err(|e| Error::internal(e.to_string()))
}

/// Parse HTTP Range header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-999
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
pub fn parse_range_header(header: &str, file_size: u64) -> Option<(u64, u64)> {
    let header = header.strip_prefix("bytes=")?;
    if file_size == 0 {
        return None;
    }

    let parts: Vec<&str> = header.split('-').collect();
    if parts.len() != 2 {
        return None;
    }

    let start = parts[0].trim();
    let end = parts[1].trim();

    match (start.is_empty(), end.is_empty()) {
        // bytes=-500 (last 500 bytes)
        (true, false) => {
            let suffix_len: u64 = end.parse().ok()?;
            if suffix_len == 0 {
                return None;
            }
            let start = file_size.saturating_sub(suffix_len);
            Some((start, file_size - 1))
        }
        // bytes=500- (from 500 to end)
        (false, true) => {
            let start: u64 = start.parse().ok()?;
            if start >= file_size {
                return None;
            }
            Some((start, file_size - 1))
        }
        // bytes=0-499
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            if start >= file_size {
                return None;
            }
            let end = end.min(file_size - 1);
            if start > end {
                return None;
            }
            Some((start, end))
        }
        // bytes=- (invalid)
        (true, true) => None,
    }
}

/// Determine content type from a file extension.
pub fn determine_content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" | "m2ts" => "video/mp2t",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use http_body_util::BodyExt;

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, value.parse().unwrap());
        headers
    }

    fn limit(bytes: u64) -> Option<ByteLimit> {
        Some(ByteLimit {
            bytes,
            denial: UpgradeRequired::units(1, 1),
        })
    }

    async fn body(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment_000.mp4");
        std::fs::write(&path, (0u8..100).collect::<Vec<_>>()).unwrap();
        (dir, path)
    }

    #[test]
    fn parses_range_forms() {
        assert_eq!(parse_range_header("bytes=0-9", 100), Some((0, 9)));
        assert_eq!(parse_range_header("bytes=90-", 100), Some((90, 99)));
        assert_eq!(parse_range_header("bytes=-10", 100), Some((90, 99)));
        assert_eq!(parse_range_header("bytes=50-500", 100), Some((50, 99)));
        assert_eq!(parse_range_header("bytes=100-", 100), None);
        assert_eq!(parse_range_header("bytes=9-3", 100), None);
        assert_eq!(parse_range_header("bytes=-", 100), None);
        assert_eq!(parse_range_header("items=0-1", 100), None);
        assert_eq!(parse_range_header("bytes=0-1", 0), None);
    }

    #[tokio::test]
    async fn serves_whole_file_without_range() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &HeaderMap::new(), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await.len(), 100);
    }

    #[tokio::test]
    async fn serves_requested_range() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &range("bytes=10-19"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/100");
        assert_eq!(body(response).await, (10u8..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &range("bytes=200-"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }

    #[tokio::test]
    async fn limited_unranged_request_gets_the_prefix() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &HeaderMap::new(), limit(34)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-33/100");
        assert_eq!(body(response).await.len(), 34);
    }

    #[tokio::test]
    async fn limited_range_is_clamped_or_denied() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &range("bytes=20-80"), limit(34)).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 20-33/100");

        let denied = serve_file(&path, "video/mp4", &range("bytes=34-"), limit(34)).await;
        assert_matches!(denied, Err(Error::AccessDenied(_)));

        let suffix = serve_file(&path, "video/mp4", &range("bytes=-10"), limit(34)).await;
        assert_matches!(suffix, Err(Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn limit_covering_the_file_is_a_plain_200() {
        let (_dir, path) = fixture();
        let response = serve_file(&path, "video/mp4", &HeaderMap::new(), limit(100)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = serve_file(&dir.path().join("nope"), "video/mp4", &HeaderMap::new(), None).await;
        assert_matches!(result, Err(Error::NotFound { .. }));
    }

    #[test]
    fn content_types() {
        assert_eq!(determine_content_type("m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(determine_content_type("TS"), "video/mp2t");
        assert_eq!(determine_content_type("key"), "application/octet-stream");
    }
}
