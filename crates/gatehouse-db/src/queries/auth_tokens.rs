//! Login session token queries.

use chrono::{Duration, Utc};
use gatehouse_common::{Error, Result, UserId};
use rusqlite::Connection;
use uuid::Uuid;

use super::{ts_col, uuid_col};
use super::users::row_to_user;
use crate::models::{AuthToken, User};

/// Create a new session token for a user.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `user_id` - ID of the user this session belongs to
/// * `ttl` - How long the session stays valid
///
/// # Returns
///
/// * `Ok(AuthToken)` - The created session
/// * `Err(Error)` - If a database error occurs
pub fn create_token(conn: &Connection, user_id: UserId, ttl: Duration) -> Result<AuthToken> {
    let token = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    let expires_at = now + ttl;

    conn.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at, expires_at, last_activity)
         VALUES (:token, :user_id, :created_at, :expires_at, :last_activity)",
        rusqlite::named_params! {
            ":token": token,
            ":user_id": user_id.to_string(),
            ":created_at": now.to_rfc3339(),
            ":expires_at": expires_at.to_rfc3339(),
            ":last_activity": now.to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(AuthToken {
        token,
        user_id,
        created_at: now,
        expires_at,
        last_activity: now,
    })
}

/// Get an unexpired session and its user.
///
/// # Returns
///
/// * `Ok(Some((AuthToken, User)))` - The session and user if found and unexpired
/// * `Ok(None)` - If the token does not exist or has expired
/// * `Err(Error)` - If a database error occurs
pub fn get_token_with_user(conn: &Connection, token: &str) -> Result<Option<(AuthToken, User)>> {
    let result = conn.query_row(
        "SELECT
            t.token, t.user_id, t.created_at, t.expires_at, t.last_activity,
            u.id, u.username, u.password_hash, u.is_admin, u.subscription_status,
            u.subscription_expires_at, u.created_at
         FROM auth_tokens t
         INNER JOIN users u ON t.user_id = u.id
         WHERE t.token = :token",
        rusqlite::named_params! { ":token": token },
        |row| {
            let auth_token = AuthToken {
                token: row.get(0)?,
                user_id: UserId::from(uuid_col(row, 1)?),
                created_at: ts_col(row, 2)?,
                expires_at: ts_col(row, 3)?,
                last_activity: ts_col(row, 4)?,
            };
            Ok((auth_token, row_to_user(row, 5)?))
        },
    );

    match result {
        Ok((auth_token, _)) if auth_token.expires_at <= Utc::now() => Ok(None),
        Ok(data) => Ok(Some(data)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Delete a session token (logout).
///
/// # Returns
///
/// * `Ok(true)` - If the token was deleted
/// * `Ok(false)` - If the token did not exist
pub fn delete_token(conn: &Connection, token: &str) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "DELETE FROM auth_tokens WHERE token = :token",
            rusqlite::named_params! { ":token": token },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows_affected > 0)
}

/// Delete every session a user holds. Used for forced logout on lockout.
///
/// # Returns
///
/// * `Ok(usize)` - Number of sessions removed
pub fn delete_user_tokens(conn: &Connection, user_id: UserId) -> Result<usize> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE user_id = :user_id",
        rusqlite::named_params! { ":user_id": user_id.to_string() },
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Update the last activity timestamp for a session.
pub fn touch_token(conn: &Connection, token: &str) -> Result<()> {
    conn.execute(
        "UPDATE auth_tokens SET last_activity = :now WHERE token = :token",
        rusqlite::named_params! {
            ":token": token,
            ":now": Utc::now().to_rfc3339(),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Remove expired sessions.
///
/// # Returns
///
/// * `Ok(usize)` - Number of sessions removed
pub fn delete_expired_tokens(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE expires_at <= :now",
        rusqlite::named_params! { ":now": Utc::now().to_rfc3339() },
    )
    .map_err(|e| Error::database(e.to_string()))
}
