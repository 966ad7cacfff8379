//! Upload-time pagination: one standalone PDF per page.
//!
//! Everything is written under a staging directory that is renamed into
//! place as a whole, and the row is inserted last. A failure at any step
//! leaves neither files nor a row behind.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use gatehouse_common::storage::{unit_source_name, ORIGINAL_DOCUMENT, READY_MARKER};
use gatehouse_common::{Error, ResourceId, Result, StorageLayout};
use gatehouse_db::models::Resource;
use gatehouse_db::pool::{get_conn, DbPool};
use gatehouse_db::queries::resources;
use gatehouse_media::PdfDocument;

/// Metadata supplied with an upload.
#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub title: String,
    pub premium: bool,
    pub preview_units: u32,
}

/// Premium resources need `0 < preview_units <= total_units`.
pub fn validate_preview(premium: bool, preview_units: u32, total_units: u32) -> Result<()> {
    if premium && (preview_units == 0 || preview_units > total_units) {
        return Err(Error::validation(format!(
            "preview_units must be between 1 and {total_units} for a premium resource"
        )));
    }
    Ok(())
}

/// Split and store an uploaded PDF, returning the new resource row.
pub async fn paginate(
    db: DbPool,
    storage: Arc<StorageLayout>,
    bytes: Bytes,
    meta: UploadMeta,
) -> Result<Resource> {
    tokio::task::spawn_blocking(move || paginate_blocking(&db, &storage, &bytes, &meta))
        .await
        .map_err(|e| Error::internal(format!("pagination task failed: {e}")))?
}

fn paginate_blocking(
    db: &DbPool,
    storage: &StorageLayout,
    bytes: &[u8],
    meta: &UploadMeta,
) -> Result<Resource> {
    if meta.title.trim().is_empty() {
        return Err(Error::validation("title is required"));
    }

    let document = PdfDocument::load(bytes)?;
    let total = document.page_count();
    validate_preview(meta.premium, meta.preview_units, total)?;

    let id = ResourceId::new();
    let staging = storage.resource_staging_dir();
    if let Err(e) = write_units(&document, bytes, &staging) {
        remove_quietly(&staging);
        return Err(e);
    }

    let dest = storage.resource_dir(id);
    if let Err(e) = fs::rename(&staging, &dest) {
        remove_quietly(&staging);
        return Err(e.into());
    }

    let inserted = get_conn(db).and_then(|conn| {
        resources::create_resource(
            &conn,
            id,
            meta.title.trim(),
            total,
            meta.premium,
            meta.preview_units,
            &dest.to_string_lossy(),
        )
    });

    match inserted {
        Ok(resource) => {
            tracing::info!(
                resource_id = %id,
                total_units = total,
                premium = meta.premium,
                "Paginated document"
            );
            Ok(resource)
        }
        Err(e) => {
            remove_quietly(&dest);
            Err(e)
        }
    }
}

fn write_units(document: &PdfDocument, original: &[u8], staging: &Path) -> Result<()> {
    fs::create_dir_all(staging)?;
    fs::write(staging.join(ORIGINAL_DOCUMENT), original)?;
    document.split_each(|unit, bytes| {
        fs::write(staging.join(unit_source_name(unit)), bytes)?;
        Ok(())
    })?;
    fs::write(staging.join(READY_MARKER), document.page_count().to_string())?;
    Ok(())
}

fn remove_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to clean up resource directory");
        }
    }
}

/// Refuse to serve a unit from a directory that was never committed or has
/// lost that unit's file.
pub fn check_ready(storage: &StorageLayout, resource: &Resource, unit: u32) -> Result<()> {
    if storage.unit_available(resource.id, unit) {
        Ok(())
    } else {
        Err(Error::NotReady(format!(
            "resource {} has no unit file {unit}",
            resource.id
        )))
    }
}

/// Refuse bulk work on a directory that was never committed.
pub fn check_committed(storage: &StorageLayout, resource: &Resource) -> Result<()> {
    if storage.is_committed(resource.id) {
        Ok(())
    } else {
        Err(Error::NotReady(format!("resource {} is incomplete", resource.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use gatehouse_db::pool::init_memory_pool;
    use gatehouse_media::document::sample::sample_pdf;

    fn setup() -> (tempfile::TempDir, DbPool, Arc<StorageLayout>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageLayout::new(dir.path());
        storage.ensure_dirs().unwrap();
        (dir, init_memory_pool().unwrap(), Arc::new(storage))
    }

    fn meta(premium: bool, preview_units: u32) -> UploadMeta {
        UploadMeta {
            title: "Field Guide".into(),
            premium,
            preview_units,
        }
    }

    fn resource_entries(storage: &StorageLayout) -> usize {
        fs::read_dir(storage.resources_dir()).unwrap().count()
    }

    #[tokio::test]
    async fn splits_every_page() {
        let (_dir, db, storage) = setup();
        let resource = paginate(db.clone(), storage.clone(), Bytes::from(sample_pdf(5)), meta(true, 2))
            .await
            .unwrap();

        assert_eq!(resource.total_units, 5);
        assert_eq!(resource.preview_units, 2);
        assert!(storage.original_document(resource.id).is_file());
        for unit in 1..=5 {
            let bytes = fs::read(storage.unit_source(resource.id, unit)).unwrap();
            assert_eq!(PdfDocument::load(&bytes).unwrap().page_count(), 1);
        }
        check_ready(&storage, &resource, 5).unwrap();
        check_committed(&storage, &resource).unwrap();

        let conn = db.get().unwrap();
        let stored = resources::get_resource(&conn, resource.id).unwrap().unwrap();
        assert_eq!(stored.total_units, 5);
        assert_eq!(stored.title, "Field Guide");
    }

    #[tokio::test]
    async fn malformed_upload_writes_nothing() {
        let (_dir, db, storage) = setup();
        let err = paginate(db.clone(), storage.clone(), Bytes::from_static(b"not a pdf"), meta(false, 0))
            .await
            .unwrap_err();

        assert_matches!(err, Error::MalformedSource(_));
        assert_eq!(resource_entries(&storage), 0);
        let conn = db.get().unwrap();
        assert!(resources::list_resources(&conn, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_preview_is_rejected_before_writing() {
        let (_dir, db, storage) = setup();
        for preview in [0, 4] {
            let err = paginate(db.clone(), storage.clone(), Bytes::from(sample_pdf(3)), meta(true, preview))
                .await
                .unwrap_err();
            assert_matches!(err, Error::Validation(_));
        }
        assert_eq!(resource_entries(&storage), 0);
    }

    #[tokio::test]
    async fn missing_unit_file_is_not_ready() {
        let (_dir, db, storage) = setup();
        let resource = paginate(db, storage.clone(), Bytes::from(sample_pdf(3)), meta(false, 0))
            .await
            .unwrap();
        fs::remove_file(storage.unit_source(resource.id, 2)).unwrap();
        assert_matches!(check_ready(&storage, &resource, 2), Err(Error::NotReady(_)));
        check_ready(&storage, &resource, 1).unwrap();
    }

    #[tokio::test]
    async fn uncommitted_directory_is_not_ready() {
        let (_dir, db, storage) = setup();
        let resource = paginate(db, storage.clone(), Bytes::from(sample_pdf(3)), meta(false, 0))
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(storage.ready_marker(resource.id)).unwrap(),
            "3"
        );

        fs::remove_file(storage.ready_marker(resource.id)).unwrap();
        assert_matches!(check_ready(&storage, &resource, 1), Err(Error::NotReady(_)));
        assert_matches!(check_committed(&storage, &resource), Err(Error::NotReady(_)));
    }

    #[test]
    fn non_premium_ignores_preview() {
        validate_preview(false, 0, 3).unwrap();
        validate_preview(false, 99, 3).unwrap();
        validate_preview(true, 3, 3).unwrap();
    }
}
