//! Paginated document queries.

use chrono::Utc;
use gatehouse_common::{Error, Result, ResourceId};
use rusqlite::Connection;

use super::{ts_col, uuid_col};
use crate::models::Resource;

const RESOURCE_COLUMNS: &str =
    "id, title, total_units, is_premium, preview_units, is_active, storage_path, created_at";

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: ResourceId::from(uuid_col(row, 0)?),
        title: row.get(1)?,
        total_units: row.get(2)?,
        is_premium: row.get::<_, i32>(3)? != 0,
        preview_units: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        storage_path: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}

/// Insert a resource whose unit files are already in place.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `id` - Identifier, matching the directory name on disk
/// * `title` - Display title
/// * `total_units` - Page count taken from the document structure
/// * `is_premium` - Whether units past the preview require entitlement
/// * `preview_units` - Free units for premium resources
/// * `storage_path` - Resource directory
///
/// # Returns
///
/// * `Ok(Resource)` - The created resource
/// * `Err(Error)` - If the preview invariant is violated or a database error occurs
pub fn create_resource(
    conn: &Connection,
    id: ResourceId,
    title: &str,
    total_units: u32,
    is_premium: bool,
    preview_units: u32,
    storage_path: &str,
) -> Result<Resource> {
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO resources (id, title, total_units, is_premium, preview_units, is_active, storage_path, created_at)
         VALUES (:id, :title, :total_units, :is_premium, :preview_units, 1, :storage_path, :created_at)",
        rusqlite::named_params! {
            ":id": id.to_string(),
            ":title": title,
            ":total_units": total_units,
            ":is_premium": is_premium,
            ":preview_units": preview_units,
            ":storage_path": storage_path,
            ":created_at": created_at.to_rfc3339(),
        },
    )
    .map_err(|e| {
        if e.to_string().contains("CHECK constraint failed") {
            Error::validation("preview_units must be in 1..=total_units for premium resources")
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(Resource {
        id,
        title: title.to_string(),
        total_units,
        is_premium,
        preview_units,
        is_active: true,
        storage_path: storage_path.to_string(),
        created_at,
    })
}

/// Get a resource by ID, active or not.
pub fn get_resource(conn: &Connection, id: ResourceId) -> Result<Option<Resource>> {
    let result = conn.query_row(
        &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = :id"),
        rusqlite::named_params! { ":id": id.to_string() },
        row_to_resource,
    );

    match result {
        Ok(resource) => Ok(Some(resource)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List resources, newest first.
pub fn list_resources(conn: &Connection, active_only: bool) -> Result<Vec<Resource>> {
    let sql = if active_only {
        format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE is_active = 1 ORDER BY created_at DESC")
    } else {
        format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY created_at DESC")
    };

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::database(e.to_string()))?;
    let resources = stmt
        .query_map([], row_to_resource)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(resources)
}

/// Activate or deactivate a resource.
pub fn set_active(conn: &Connection, id: ResourceId, active: bool) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE resources SET is_active = :active WHERE id = :id",
            rusqlite::named_params! { ":id": id.to_string(), ":active": active },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found("resource", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use assert_matches::assert_matches;

    #[test]
    fn test_create_and_get_resource() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let id = ResourceId::new();

        let created = create_resource(&conn, id, "Guide", 50, true, 3, "/data/r").unwrap();
        let fetched = get_resource(&conn, id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.total_units, 50);
        assert!(fetched.is_active);

        assert!(get_resource(&conn, ResourceId::new()).unwrap().is_none());
    }

    #[test]
    fn test_premium_preview_must_fit() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();

        let err = create_resource(&conn, ResourceId::new(), "Bad", 5, true, 6, "/x").unwrap_err();
        assert_matches!(err, Error::Validation(_));

        // Free resources ignore the preview count.
        create_resource(&conn, ResourceId::new(), "Free", 5, false, 0, "/x").unwrap();
    }

    #[test]
    fn test_deactivate_hides_from_active_listing() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let id = ResourceId::new();
        create_resource(&conn, id, "Guide", 2, false, 0, "/x").unwrap();

        set_active(&conn, id, false).unwrap();
        assert!(list_resources(&conn, true).unwrap().is_empty());
        assert_eq!(list_resources(&conn, false).unwrap().len(), 1);
        assert_matches!(
            set_active(&conn, ResourceId::new(), true),
            Err(Error::NotFound { .. })
        );
    }
}
