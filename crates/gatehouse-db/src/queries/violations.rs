//! Violation ledger queries.
//!
//! The ledger is append-only. Sequence numbers are allocated per
//! (user, resource, session) inside a `BEGIN IMMEDIATE` transaction, so two
//! concurrent reports for the same key serialize on the write lock and can
//! never both read the same previous maximum. The UNIQUE constraint on
//! `(user_id, resource_id, session_id, sequence_number)` backs this up.

use chrono::{DateTime, Utc};
use gatehouse_common::{Error, Result, UserId};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use super::{enum_col, ts_col, uuid_col};
use crate::models::{Violation, ViolationFilter, ViolationKind};

const VIOLATION_COLUMNS: &str = "id, user_id, resource_id, session_id, kind, sequence_number, \
     occurred_at, recorded_at, notified";

fn row_to_violation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Violation> {
    Ok(Violation {
        id: row.get(0)?,
        user_id: UserId::from(uuid_col(row, 1)?),
        resource_id: uuid_col(row, 2)?,
        session_id: row.get(3)?,
        kind: enum_col(row, 4)?,
        sequence_number: row.get(5)?,
        occurred_at: ts_col(row, 6)?,
        recorded_at: ts_col(row, 7)?,
        notified: row.get::<_, i32>(8)? != 0,
    })
}

/// Append a violation with the next sequence number for its session.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `user_id` - Offending user
/// * `resource_id` - Document or video being viewed
/// * `session_id` - Opaque identifier of the protected session
/// * `kind` - What was detected
/// * `occurred_at` - Client-reported detection time
///
/// # Returns
///
/// * `Ok(Violation)` - The recorded entry, carrying its sequence number
/// * `Err(Error)` - If a database error occurs
pub fn record_violation(
    conn: &Connection,
    user_id: UserId,
    resource_id: Uuid,
    session_id: &str,
    kind: ViolationKind,
    occurred_at: DateTime<Utc>,
) -> Result<Violation> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))?;

    let sequence_number: u32 = tx
        .query_row(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM violations
             WHERE user_id = :user_id AND resource_id = :resource_id AND session_id = :session_id",
            rusqlite::named_params! {
                ":user_id": user_id.to_string(),
                ":resource_id": resource_id.to_string(),
                ":session_id": session_id,
            },
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let recorded_at = Utc::now();
    tx.execute(
        "INSERT INTO violations (user_id, resource_id, session_id, kind, sequence_number, occurred_at, recorded_at)
         VALUES (:user_id, :resource_id, :session_id, :kind, :sequence_number, :occurred_at, :recorded_at)",
        rusqlite::named_params! {
            ":user_id": user_id.to_string(),
            ":resource_id": resource_id.to_string(),
            ":session_id": session_id,
            ":kind": kind.to_string(),
            ":sequence_number": sequence_number,
            ":occurred_at": occurred_at.to_rfc3339(),
            ":recorded_at": recorded_at.to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    let id = tx.last_insert_rowid();

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(Violation {
        id,
        user_id,
        resource_id,
        session_id: session_id.to_string(),
        kind,
        sequence_number,
        occurred_at,
        recorded_at,
        notified: false,
    })
}

/// Get a single ledger entry.
pub fn get_violation(conn: &Connection, id: i64) -> Result<Option<Violation>> {
    let result = conn.query_row(
        &format!("SELECT {VIOLATION_COLUMNS} FROM violations WHERE id = :id"),
        rusqlite::named_params! { ":id": id },
        row_to_violation,
    );

    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List ledger entries, newest first.
///
/// `critical_threshold` is the sequence number at which a session is locked;
/// [`ViolationFilter::Critical`] returns entries at or above it.
pub fn list_violations(
    conn: &Connection,
    filter: ViolationFilter,
    critical_threshold: u32,
) -> Result<Vec<Violation>> {
    let clause = match filter {
        ViolationFilter::All => "1 = 1",
        ViolationFilter::Unnotified => "notified = 0",
        ViolationFilter::Critical => "sequence_number >= :threshold",
    };
    let sql = format!(
        "SELECT {VIOLATION_COLUMNS} FROM violations WHERE {clause} ORDER BY recorded_at DESC, id DESC"
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = match filter {
        ViolationFilter::Critical => stmt.query_map(
            rusqlite::named_params! { ":threshold": critical_threshold },
            row_to_violation,
        ),
        _ => stmt.query_map([], row_to_violation),
    }
    .map_err(|e| Error::database(e.to_string()))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Mark an entry as notified. One-way and idempotent.
///
/// # Returns
///
/// * `Ok(Violation)` - The entry after the update
/// * `Err(Error::NotFound)` - If no entry has this ID
pub fn mark_notified(conn: &Connection, id: i64) -> Result<Violation> {
    conn.execute(
        "UPDATE violations SET notified = 1 WHERE id = :id AND notified = 0",
        rusqlite::named_params! { ":id": id },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    get_violation(conn, id)?.ok_or_else(|| Error::not_found("violation", id))
}
