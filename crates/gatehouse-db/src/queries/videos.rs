//! Video asset queries and package state transitions.
//!
//! State machine: `pending -> processing -> segmented | passthrough | failed`.
//! A worker claims a video with [`claim_for_processing`]; the outcome is written
//! with [`finish_processing`], which only matches rows still in `processing`,
//! so each run lands its result exactly once.
//!
//! `served_package` tracks what is actually on disk. It only moves when a run
//! swaps in a new package, so a rebuild or a failed rerun leaves the previous
//! package playable.

use chrono::Utc;
use gatehouse_common::{Error, Result, VideoId};
use rusqlite::Connection;

use super::{enum_col, opt_enum_col, ts_col, uuid_col};
use crate::models::{PackageState, Video};

const VIDEO_COLUMNS: &str = "id, title, source_format, is_premium, preview_seconds, duration_seconds, \
     watermark_text, package_state, served_package, encrypted, has_thumbnail, error_message, \
     is_active, storage_path, created_at, updated_at";

fn row_to_video(row: &rusqlite::Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: VideoId::from(uuid_col(row, 0)?),
        title: row.get(1)?,
        source_format: row.get(2)?,
        is_premium: row.get::<_, i32>(3)? != 0,
        preview_seconds: row.get(4)?,
        duration_seconds: row.get(5)?,
        watermark_text: row.get(6)?,
        package_state: enum_col(row, 7)?,
        served_package: opt_enum_col(row, 8)?,
        encrypted: row.get::<_, i32>(9)? != 0,
        has_thumbnail: row.get::<_, i32>(10)? != 0,
        error_message: row.get(11)?,
        is_active: row.get::<_, i32>(12)? != 0,
        storage_path: row.get(13)?,
        created_at: ts_col(row, 14)?,
        updated_at: ts_col(row, 15)?,
    })
}

/// Fields supplied at upload time.
#[derive(Debug, Clone)]
pub struct NewVideo<'a> {
    pub id: VideoId,
    pub title: &'a str,
    pub source_format: &'a str,
    pub is_premium: bool,
    pub preview_seconds: u32,
    pub duration_seconds: Option<f64>,
    pub watermark_text: Option<&'a str>,
    pub storage_path: &'a str,
}

/// Outcome of one processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOutcome {
    pub state: PackageState,
    pub encrypted: bool,
    pub has_thumbnail: bool,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// Insert a video in the `pending` state.
pub fn create_video(conn: &Connection, new: &NewVideo<'_>) -> Result<Video> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO videos (id, title, source_format, is_premium, preview_seconds, duration_seconds,
                             watermark_text, package_state, storage_path, created_at, updated_at)
         VALUES (:id, :title, :source_format, :is_premium, :preview_seconds, :duration_seconds,
                 :watermark_text, 'pending', :storage_path, :now, :now)",
        rusqlite::named_params! {
            ":id": new.id.to_string(),
            ":title": new.title,
            ":source_format": new.source_format,
            ":is_premium": new.is_premium,
            ":preview_seconds": new.preview_seconds,
            ":duration_seconds": new.duration_seconds,
            ":watermark_text": new.watermark_text,
            ":storage_path": new.storage_path,
            ":now": now.to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Video {
        id: new.id,
        title: new.title.to_string(),
        source_format: new.source_format.to_string(),
        is_premium: new.is_premium,
        preview_seconds: new.preview_seconds,
        duration_seconds: new.duration_seconds,
        watermark_text: new.watermark_text.map(String::from),
        package_state: PackageState::Pending,
        served_package: None,
        encrypted: false,
        has_thumbnail: false,
        error_message: None,
        is_active: true,
        storage_path: new.storage_path.to_string(),
        created_at: now,
        updated_at: now,
    })
}

/// Get a video by ID.
pub fn get_video(conn: &Connection, id: VideoId) -> Result<Option<Video>> {
    let result = conn.query_row(
        &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = :id"),
        rusqlite::named_params! { ":id": id.to_string() },
        row_to_video,
    );

    match result {
        Ok(video) => Ok(Some(video)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List videos in a given package state, oldest first.
pub fn list_videos_by_state(conn: &Connection, state: PackageState) -> Result<Vec<Video>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE package_state = :state ORDER BY created_at ASC"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let videos = stmt
        .query_map(
            rusqlite::named_params! { ":state": state.to_string() },
            row_to_video,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(videos)
}

/// Move a `pending` video to `processing`.
///
/// # Returns
///
/// * `Ok(true)` - This caller now owns the processing run
/// * `Ok(false)` - The video was not pending (already claimed or finished)
pub fn claim_for_processing(conn: &Connection, id: VideoId) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE videos SET package_state = 'processing', error_message = NULL, updated_at = :now
             WHERE id = :id AND package_state = 'pending'",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":now": Utc::now().to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows == 1)
}

/// Record the outcome of a processing run.
///
/// Only rows still in `processing` are updated. A servable outcome becomes the
/// served package along with its flags; a failed one leaves the previous
/// package and its flags alone.
///
/// # Returns
///
/// * `Ok(true)` - The outcome was recorded
/// * `Ok(false)` - The video was no longer processing; nothing changed
pub fn finish_processing(conn: &Connection, id: VideoId, outcome: &PackageOutcome) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE videos SET
                package_state = :state,
                served_package = CASE WHEN :servable THEN :state ELSE served_package END,
                encrypted = CASE WHEN :servable THEN :encrypted ELSE encrypted END,
                has_thumbnail = CASE WHEN :servable THEN :has_thumbnail ELSE has_thumbnail END,
                duration_seconds = COALESCE(:duration_seconds, duration_seconds),
                error_message = :error_message,
                updated_at = :now
             WHERE id = :id AND package_state = 'processing'",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":state": outcome.state.to_string(),
                ":servable": outcome.state.is_servable(),
                ":encrypted": outcome.encrypted,
                ":has_thumbnail": outcome.has_thumbnail,
                ":duration_seconds": outcome.duration_seconds,
                ":error_message": outcome.error_message,
                ":now": Utc::now().to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows == 1)
}

/// Put a finished video back into `pending` for a rebuild.
///
/// The served package is untouched and keeps playing until the rebuild lands.
///
/// # Returns
///
/// * `Ok(true)` - The video is pending again
/// * `Ok(false)` - The video is already pending or processing
pub fn request_reprocess(conn: &Connection, id: VideoId) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE videos SET package_state = 'pending', updated_at = :now
             WHERE id = :id AND package_state IN ('segmented', 'passthrough', 'failed')",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":now": Utc::now().to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows == 1)
}

/// Reset videos stuck in `processing` (from a previous crash) back to `pending`.
///
/// # Returns
///
/// * `Ok(usize)` - Number of videos reset
pub fn reset_orphaned_processing(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE videos SET package_state = 'pending', updated_at = :now
         WHERE package_state = 'processing'",
        rusqlite::named_params! { ":now": Utc::now().to_rfc3339() },
    )
    .map_err(|e| Error::database(e.to_string()))
}
