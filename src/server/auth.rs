//! Login sessions.
//!
//! A successful login creates a row in `auth_tokens`; the token is returned
//! in the body for API clients and set as an HttpOnly cookie for browsers.
//! Either form is accepted on later requests (see [`crate::access::Caller`]).

use crate::access::{Caller, SESSION_COOKIE_NAME};
use crate::server::{AppContext, AppError};
use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use gatehouse_common::Error;
use gatehouse_db::models::User;
use gatehouse_db::pool::get_conn;
use gatehouse_db::queries::{auth_tokens, users};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Login request payload
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Login handler
pub async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let user = {
        let conn = get_conn(&ctx.db)?;
        users::get_user_by_username(&conn, &payload.username)?
    };

    // Unknown users are checked against a dummy hash so both paths cost the same.
    let known_hash = user.as_ref().map(|u| u.password_hash.clone());
    let password = payload.password;
    let verified = tokio::task::spawn_blocking(move || {
        let hash = match known_hash {
            Some(hash) => hash,
            None => dummy_hash()?.to_string(),
        };
        Ok::<_, bcrypt::BcryptError>(bcrypt::verify(password, &hash).unwrap_or(false))
    })
    .await
    .map_err(|e| Error::internal(e.to_string()))?
    .map_err(|e| Error::internal(e.to_string()))?;

    let user = match user {
        Some(user) if verified => user,
        _ => {
            tracing::info!(username = %payload.username, "Failed login");
            return Err(Error::Unauthorized("invalid credentials".into()).into());
        }
    };

    let ttl_hours = ctx.config.server.session_ttl_hours;
    let session = {
        let conn = get_conn(&ctx.db)?;
        auth_tokens::create_token(&conn, user.id, chrono::Duration::hours(ttl_hours as i64))?
    };

    let cookie = Cookie::build((SESSION_COOKIE_NAME, session.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(ttl_hours as i64))
        .build();

    tracing::info!(user = %user.username, "Login");

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            success: true,
            token: session.token,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

fn dummy_hash() -> Result<&'static str, bcrypt::BcryptError> {
    static DUMMY: OnceLock<String> = OnceLock::new();
    if let Some(hash) = DUMMY.get() {
        return Ok(hash.as_str());
    }
    let hash = hash_password(&generate_secret())?;
    Ok(DUMMY.get_or_init(|| hash).as_str())
}

/// Logout handler
pub async fn logout(
    State(ctx): State<AppContext>,
    caller: Caller,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    if let Ok((_, token)) = caller.require_session() {
        let conn = get_conn(&ctx.db)?;
        auth_tokens::delete_token(&conn, &token)?;
    }
    Ok((jar.remove(expired_session_cookie()), StatusCode::OK))
}

/// Cookie that clears the browser session.
pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    pub username: Option<String>,
    pub is_admin: bool,
    /// Whether the subscription currently unlocks premium content.
    pub entitled: bool,
}

/// Check current auth status
pub async fn auth_status(caller: Caller) -> Json<AuthStatusResponse> {
    let response = match caller.member() {
        Some(member) => AuthStatusResponse {
            authenticated: true,
            username: Some(member.user.username.clone()),
            is_admin: member.user.is_admin,
            entitled: member.entitled,
        },
        None => AuthStatusResponse {
            authenticated: false,
            username: None,
            is_admin: false,
            entitled: false,
        },
    };
    Json(response)
}

/// Generate a bcrypt password hash
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// Generate a random token signing secret
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}
