//! Per-request caller resolution.
//!
//! Order: signed video token (video routes only), `Authorization: Bearer`,
//! the session cookie, then anonymous. The user row is loaded on every
//! request so entitlement always reflects the current subscription.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use chrono::{DateTime, Utc};
use gatehouse_common::{Error, Result, VideoId};
use gatehouse_db::models::User;
use gatehouse_db::pool::get_conn;
use gatehouse_db::queries::{auth_tokens, users};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use super::policy::Viewer;
use super::token::TokenSigner;
use crate::server::{AppContext, AppError};

/// Name of the login session cookie.
pub const SESSION_COOKIE_NAME: &str = "gatehouse_session";

/// A logged-in user, with entitlement derived at resolution time.
#[derive(Debug, Clone)]
pub struct Member {
    pub user: User,
    pub entitled: bool,
    /// Session token, absent when authenticated by a signed video token.
    pub session: Option<String>,
}

impl Member {
    fn new(user: User, session: Option<String>, now: DateTime<Utc>) -> Self {
        let entitled = user.is_entitled(now);
        Self {
            user,
            entitled,
            session,
        }
    }

    /// Opaque ledger identifier for the session; the raw token is never stored.
    pub fn session_id(&self) -> Option<String> {
        self.session.as_deref().map(session_id_for)
    }
}

/// Hex SHA-256 of a session token.
pub fn session_id_for(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Member(Member),
}

impl Caller {
    pub fn viewer(&self) -> Viewer {
        match self {
            Caller::Anonymous => Viewer::Anonymous,
            Caller::Member(member) => Viewer::Authenticated {
                entitled: member.entitled,
            },
        }
    }

    pub fn member(&self) -> Option<&Member> {
        match self {
            Caller::Anonymous => None,
            Caller::Member(member) => Some(member),
        }
    }

    /// The member and their session token, or 401.
    pub fn require_session(self) -> Result<(Member, String)> {
        match self {
            Caller::Member(member) => match member.session.clone() {
                Some(token) => Ok((member, token)),
                None => Err(Error::Unauthorized("a login session is required".into())),
            },
            Caller::Anonymous => Err(Error::Unauthorized("not logged in".into())),
        }
    }
}

/// Session token from the Bearer header, falling back to the cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a session token. Unknown or expired sessions are anonymous.
pub fn resolve_session(conn: &Connection, token: &str, now: DateTime<Utc>) -> Result<Caller> {
    match auth_tokens::get_token_with_user(conn, token)? {
        Some((_, user)) => {
            auth_tokens::touch_token(conn, token)?;
            Ok(Caller::Member(Member::new(user, Some(token.to_string()), now)))
        }
        None => Ok(Caller::Anonymous),
    }
}

/// Resolve a signed video token. A bad token is 401, never anonymous.
pub fn resolve_signed(
    conn: &Connection,
    signer: &TokenSigner,
    token: &str,
    video_id: VideoId,
    now: DateTime<Utc>,
) -> Result<Caller> {
    let user_id = signer.verify(token, video_id, now)?;
    let user = users::get_user(conn, user_id)?
        .ok_or_else(|| Error::Unauthorized("token user no longer exists".into()))?;
    Ok(Caller::Member(Member::new(user, None, now)))
}

#[async_trait]
impl FromRequestParts<AppContext> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> std::result::Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Ok(Caller::Anonymous);
        };
        let conn = get_conn(&ctx.db)?;
        Ok(resolve_session(&conn, &token, Utc::now())?)
    }
}

/// Extractor for admin-only routes.
#[derive(Debug, Clone)]
pub struct Admin(pub User);

#[async_trait]
impl FromRequestParts<AppContext> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> std::result::Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, ctx).await? {
            Caller::Member(member) if member.user.is_admin => Ok(Admin(member.user)),
            Caller::Member(_) => Err(Error::Forbidden("admin access required".into()).into()),
            Caller::Anonymous => Err(Error::Unauthorized("not logged in".into()).into()),
        }
    }
}
