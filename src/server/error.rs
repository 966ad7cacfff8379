//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; every
//! [`gatehouse_common::Error`] converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gatehouse_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl From<gatehouse_av::Error> for AppError {
    fn from(e: gatehouse_av::Error) -> Self {
        Self::new(e.into())
    }
}

impl From<gatehouse_media::Error> for AppError {
    fn from(e: gatehouse_media::Error) -> Self {
        Self::new(e.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let mut body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
        });

        if let Error::AccessDenied(upgrade) = &self.inner {
            body["upgradeRequired"] = json!(true);
            body["availableUnits"] = json!(upgrade.available_units);
            body["totalUnits"] = json!(upgrade.total_units);
            body["availablePages"] = json!(upgrade.available_units);
            body["totalPages"] = json!(upgrade.total_units);
            if let Some(preview) = upgrade.preview_seconds {
                body["previewSeconds"] = json!(preview);
            }
            if let Some(duration) = upgrade.duration_seconds {
                body["durationSeconds"] = json!(duration);
            }
        }

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_common::UpgradeRequired;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn not_found_produces_404() {
        let response = AppError::new(Error::not_found("resource", "abc")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_ready_produces_409() {
        let response = AppError::new(Error::NotReady("units missing".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn tool_unavailable_produces_503() {
        let response = AppError::new(Error::tool_unavailable("ffmpeg")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn upgrade_body_carries_page_counts() {
        let response =
            AppError::new(Error::AccessDenied(UpgradeRequired::units(3, 50))).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["code"], "upgrade_required");
        assert_eq!(body["upgradeRequired"], true);
        assert_eq!(body["availablePages"], 3);
        assert_eq!(body["totalPages"], 50);
        assert_eq!(body["availableUnits"], 3);
        assert!(body.get("previewSeconds").is_none());
    }

    #[tokio::test]
    async fn video_upgrade_body_carries_preview_window() {
        let upgrade = UpgradeRequired {
            available_units: 2,
            total_units: 10,
            preview_seconds: Some(12),
            duration_seconds: Some(60.0),
        };
        let body = body_json(AppError::new(Error::AccessDenied(upgrade)).into_response()).await;
        assert_eq!(body["previewSeconds"], 12);
        assert_eq!(body["durationSeconds"], 60.0);
    }
}
