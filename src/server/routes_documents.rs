//! Paginated document routes.
//!
//! Units are served either as single-page PDFs or as JPEG page images. Both
//! go through the same access check; a caller never learns anything about
//! a unit they may not see beyond the upgrade payload.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use gatehouse_common::{Error, ResourceId};
use gatehouse_db::models::Resource;
use gatehouse_db::pool::get_conn;
use gatehouse_db::queries::resources;
use serde::{Deserialize, Serialize};

use super::{AppContext, AppError};
use crate::access::{authorize_unit, evaluate, Access, Admin, Caller, Subject};
use crate::documents::{self, ConvertSummary, RasterSource, UploadMeta};
use crate::streaming::serve_file;

const X_PAGE_NUMBER: HeaderName = HeaderName::from_static("x-page-number");
const X_TOTAL_PAGES: HeaderName = HeaderName::from_static("x-total-pages");
const X_RASTER_METHOD: HeaderName = HeaderName::from_static("x-raster-method");
const X_RASTER_FALLBACK: HeaderName = HeaderName::from_static("x-raster-fallback");

/// Create document routes.
pub fn document_routes() -> Router<AppContext> {
    Router::new()
        .route("/resources", post(upload_resource))
        .route("/resources/:id", get(get_resource))
        .route("/resources/:id/unit/:n", get(serve_unit))
        .route("/resources/:id/image/:n", get(serve_image))
        .route("/resources/:id/convert-to-images", post(convert_to_images))
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub title: String,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub preview_units: u32,
}

/// What the caller may see of a resource.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessView {
    pub full_access: bool,
    pub available_units: u32,
    pub upgrade_required: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: ResourceId,
    pub title: String,
    pub total_units: u32,
    pub is_premium: bool,
    pub preview_units: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessView>,
}

impl ResourceView {
    fn new(resource: &Resource, access: Option<Access>) -> Self {
        let access = access.and_then(|access| {
            let available = access.visible_units(resource.total_units)?;
            Some(AccessView {
                full_access: access == Access::Full,
                available_units: available,
                upgrade_required: available < resource.total_units,
            })
        });
        Self {
            id: resource.id,
            title: resource.title.clone(),
            total_units: resource.total_units,
            is_premium: resource.is_premium,
            preview_units: resource.preview_units,
            created_at: resource.created_at,
            access,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Load an active resource. Malformed, unknown and inactive IDs all read as 404.
fn load_resource(ctx: &AppContext, id: &str) -> Result<Resource, Error> {
    let id: ResourceId = id.parse().map_err(|_| Error::not_found("resource", id))?;
    let conn = get_conn(&ctx.db)?;
    resources::get_resource(&conn, id)?
        .filter(|r| r.is_active)
        .ok_or_else(|| Error::not_found("resource", id))
}

fn access_for(ctx: &AppContext, resource: &Resource, caller: &Caller) -> Access {
    let subject = Subject {
        active: resource.is_active,
        premium: resource.is_premium,
        preview_limit: resource.preview_units,
        total: resource.total_units,
    };
    evaluate(
        &subject,
        caller.viewer(),
        ctx.config.access.anonymous_preview_units,
    )
}

/// Resolve and authorize a unit request; returns the resource on success.
fn authorize(ctx: &AppContext, caller: &Caller, id: &str, n: &str) -> Result<(Resource, u32), Error> {
    let resource = load_resource(ctx, id)?;
    let unit: u32 = n.parse().map_err(|_| Error::not_found("unit", n))?;
    authorize_unit(access_for(ctx, &resource, caller), unit, resource.total_units)?;
    documents::check_ready(&ctx.storage, &resource, unit)?;
    Ok((resource, unit))
}

fn page_headers(headers: &mut HeaderMap, unit: u32, total: u32) {
    headers.insert(X_PAGE_NUMBER, HeaderValue::from(unit));
    headers.insert(X_TOTAL_PAGES, HeaderValue::from(total));
}

// ============================================================================
// Handlers
// ============================================================================

/// Upload a PDF (admin only). The body is the raw document.
async fn upload_resource(
    State(ctx): State<AppContext>,
    Admin(admin): Admin,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let meta = UploadMeta {
        title: query.title,
        premium: query.premium,
        preview_units: query.preview_units,
    };
    let resource = documents::paginate(ctx.db.clone(), ctx.storage.clone(), body, meta).await?;

    tracing::info!(
        resource_id = %resource.id,
        units = resource.total_units,
        admin = %admin.username,
        "Resource uploaded"
    );

    Ok((StatusCode::CREATED, Json(ResourceView::new(&resource, None))))
}

/// Resource metadata with the caller's access summary.
async fn get_resource(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ResourceView>, AppError> {
    let resource = load_resource(&ctx, &id)?;
    let access = access_for(&ctx, &resource, &caller);
    if access == Access::Denied {
        return Err(Error::not_found("resource", id).into());
    }
    Ok(Json(ResourceView::new(&resource, Some(access))))
}

/// Serve one unit as a standalone PDF.
async fn serve_unit(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path((id, n)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (resource, unit) = authorize(&ctx, &caller, &id, &n)?;

    let path = ctx.storage.unit_source(resource.id, unit);
    let mut response = serve_file(&path, "application/pdf", &headers, None).await?;
    page_headers(response.headers_mut(), unit, resource.total_units);
    Ok(response)
}

/// Serve one unit as a JPEG, rendering and caching it on first request.
async fn serve_image(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path((id, n)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (resource, unit) = authorize(&ctx, &caller, &id, &n)?;

    let output = ctx.rasterizer.get_or_render(&resource, unit).await?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_LENGTH, output.jpeg.len())
        .header(header::CACHE_CONTROL, "private, no-store")
        .header(X_RASTER_METHOD, output.source.label())
        .body(Body::from(output.jpeg))
        .map_err(|e| Error::internal(e.to_string()))?;

    if output.source == RasterSource::Placeholder {
        response
            .headers_mut()
            .insert(X_RASTER_FALLBACK, HeaderValue::from_static("placeholder"));
    }
    page_headers(response.headers_mut(), unit, resource.total_units);
    Ok(response)
}

/// Pre-render every unit image (admin only).
async fn convert_to_images(
    State(ctx): State<AppContext>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<ConvertSummary>, AppError> {
    let resource = load_resource(&ctx, &id)?;
    documents::check_committed(&ctx.storage, &resource)?;

    let summary = ctx.rasterizer.convert_all(&resource).await?;
    tracing::info!(
        resource_id = %resource.id,
        converted = summary.converted,
        skipped = summary.skipped,
        failed = summary.failed,
        "Bulk conversion finished"
    );
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(total: u32, premium: bool, preview: u32) -> Resource {
        Resource {
            id: ResourceId::new(),
            title: "Handbook".into(),
            total_units: total,
            is_premium: premium,
            preview_units: preview,
            is_active: true,
            storage_path: "/tmp/x".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn view_reports_preview_access() {
        let view = ResourceView::new(&resource(50, true, 3), Some(Access::PreviewOnly(3)));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["totalUnits"], 50);
        assert_eq!(json["access"]["availableUnits"], 3);
        assert_eq!(json["access"]["upgradeRequired"], true);
        assert_eq!(json["access"]["fullAccess"], false);
    }

    #[test]
    fn view_without_access_omits_the_block() {
        let view = ResourceView::new(&resource(5, false, 0), None);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("access").is_none());
        assert!(json.get("storagePath").is_none());
    }
}
