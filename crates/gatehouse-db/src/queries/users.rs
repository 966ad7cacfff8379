//! User database queries.
//!
//! Gatehouse only creates users for bootstrap; account management lives
//! elsewhere. Entitlement is read from the row on every request.

use chrono::{DateTime, Utc};
use gatehouse_common::{Error, Result, UserId};
use rusqlite::Connection;

use super::{enum_col, opt_ts_col, ts_col, uuid_col};
use crate::models::{SubscriptionStatus, User};

pub(crate) const USER_COLUMNS: &str =
    "id, username, password_hash, is_admin, subscription_status, subscription_expires_at, created_at";

/// Map a row selected with [`USER_COLUMNS`] starting at `offset`.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from(uuid_col(row, offset)?),
        username: row.get(offset + 1)?,
        password_hash: row.get(offset + 2)?,
        is_admin: row.get::<_, i32>(offset + 3)? != 0,
        subscription_status: enum_col(row, offset + 4)?,
        subscription_expires_at: opt_ts_col(row, offset + 5)?,
        created_at: ts_col(row, offset + 6)?,
    })
}

/// Create a new user.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `username` - Unique username
/// * `password_hash` - bcrypt hash
/// * `is_admin` - Whether the user has admin privileges
///
/// # Returns
///
/// * `Ok(User)` - The created user
/// * `Err(Error)` - If the username already exists or database error occurs
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    is_admin: bool,
) -> Result<User> {
    let id = UserId::new();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO users (id, username, password_hash, is_admin, created_at)
         VALUES (:id, :username, :password_hash, :is_admin, :created_at)",
        rusqlite::named_params! {
            ":id": id.to_string(),
            ":username": username,
            ":password_hash": password_hash,
            ":is_admin": is_admin,
            ":created_at": created_at.to_rfc3339(),
        },
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::validation(format!("Username '{}' already exists", username))
        } else {
            Error::database(e.to_string())
        }
    })?;

    Ok(User {
        id,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        is_admin,
        subscription_status: SubscriptionStatus::None,
        subscription_expires_at: None,
        created_at,
    })
}

/// Get a user by ID.
///
/// # Returns
///
/// * `Ok(Some(User))` - The user if found
/// * `Ok(None)` - If the user does not exist
/// * `Err(Error)` - If a database error occurs
pub fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let result = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = :id"),
        rusqlite::named_params! { ":id": id.to_string() },
        |row| row_to_user(row, 0),
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a user by username.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let result = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE username = :username"),
        rusqlite::named_params! { ":username": username },
        |row| row_to_user(row, 0),
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Set a user's subscription status and optional expiry.
///
/// Stands in for the payment gateway, whose only observable effect is this
/// pair of columns.
///
/// # Returns
///
/// * `Ok(())` - If the user was updated
/// * `Err(Error::NotFound)` - If the user does not exist
pub fn set_subscription(
    conn: &Connection,
    id: UserId,
    status: SubscriptionStatus,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE users SET subscription_status = :status, subscription_expires_at = :expires_at
             WHERE id = :id",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":status": status.to_string(),
                ":expires_at": expires_at.map(|t| t.to_rfc3339()),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found("user", id));
    }
    Ok(())
}

/// Count all users.
pub fn count_users(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))
}
