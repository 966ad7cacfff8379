//! Violation ledger routes.
//!
//! Viewers report detected circumvention attempts here. Reports are bound
//! to the reporting session; when a session reaches the lockout threshold
//! every session of the user is revoked.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use gatehouse_common::Error;
use gatehouse_db::models::{Violation, ViolationFilter};
use gatehouse_db::pool::get_conn;
use gatehouse_db::queries::{auth_tokens, violations};
use serde::{Deserialize, Serialize};

use super::auth::expired_session_cookie;
use super::{AppContext, AppError};
use crate::access::caller::session_id_for;
use crate::access::{Admin, Caller};
use crate::protection::{StrikeState, ViolationReport, LOGIN_REDIRECT};

/// Create violation ledger routes.
pub fn violation_routes() -> Router<AppContext> {
    Router::new()
        .route("/violations", get(list_violations).post(report_violation))
        .route("/violations/:id", patch(mark_notified))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub sequence_number: u32,
    pub strikes: u32,
    pub state: &'static str,
    pub logout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<&'static str>,
}

impl ReportResponse {
    fn new(sequence_number: u32, threshold: u32) -> Self {
        match StrikeState::after(sequence_number, threshold) {
            StrikeState::Locked => Self {
                sequence_number,
                strikes: sequence_number,
                state: "locked",
                logout: true,
                redirect: Some(LOGIN_REDIRECT),
            },
            _ => Self {
                sequence_number,
                strikes: sequence_number,
                state: "warned",
                logout: false,
                redirect: None,
            },
        }
    }

    fn locked(&self) -> bool {
        self.logout
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: ViolationFilter,
}

/// Record a violation for the calling session.
async fn report_violation(
    State(ctx): State<AppContext>,
    caller: Caller,
    jar: CookieJar,
    body: std::result::Result<Json<ViolationReport>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let (member, token) = caller.require_session()?;
    // An unknown `type` is a client mistake, not an unprocessable entity.
    let Json(body) = body.map_err(|rejection| Error::Validation(rejection.body_text()))?;
    if body.user_id != member.user.id {
        return Err(Error::Forbidden("report does not match the session user".into()).into());
    }
    let kind = body.kind;

    let threshold = ctx.config.access.lockout_threshold;
    let occurred_at = body.timestamp.unwrap_or_else(Utc::now);
    let session_id = session_id_for(&token);

    let conn = get_conn(&ctx.db)?;
    let entry = violations::record_violation(
        &conn,
        member.user.id,
        body.resource_id,
        &session_id,
        kind,
        occurred_at,
    )?;

    let response = ReportResponse::new(entry.sequence_number, threshold);
    tracing::warn!(
        user = %member.user.username,
        resource_id = %body.resource_id,
        kind = %kind,
        sequence = entry.sequence_number,
        "Protection violation recorded"
    );

    let jar = if response.locked() {
        let revoked = auth_tokens::delete_user_tokens(&conn, member.user.id)?;
        tracing::warn!(
            user = %member.user.username,
            sessions = revoked,
            "Lockout threshold reached, sessions revoked"
        );
        jar.add(expired_session_cookie())
    } else {
        jar
    };

    Ok((StatusCode::CREATED, jar, Json(response)))
}

/// List ledger entries (admin only).
async fn list_violations(
    State(ctx): State<AppContext>,
    _admin: Admin,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Violation>>, AppError> {
    let conn = get_conn(&ctx.db)?;
    let entries =
        violations::list_violations(&conn, query.filter, ctx.config.access.lockout_threshold)?;
    Ok(Json(entries))
}

/// Mark an entry as notified (admin only).
async fn mark_notified(
    State(ctx): State<AppContext>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<Violation>, AppError> {
    let id: i64 = id.parse().map_err(|_| Error::not_found("violation", &id))?;
    let conn = get_conn(&ctx.db)?;
    Ok(Json(violations::mark_notified(&conn, id)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_follow_the_threshold() {
        let warned = serde_json::to_value(ReportResponse::new(2, 3)).unwrap();
        assert_eq!(warned["state"], "warned");
        assert_eq!(warned["logout"], false);
        assert!(warned.get("redirect").is_none());

        let locked = serde_json::to_value(ReportResponse::new(3, 3)).unwrap();
        assert_eq!(locked["sequenceNumber"], 3);
        assert_eq!(locked["state"], "locked");
        assert_eq!(locked["logout"], true);
        assert_eq!(locked["redirect"], "/login");
    }

    #[test]
    fn report_body_reads_camel_case() {
        let body: ViolationReport = serde_json::from_value(serde_json::json!({
            "type": "devtools",
            "userId": uuid::Uuid::nil(),
            "resourceId": uuid::Uuid::nil(),
        }))
        .unwrap();
        assert_eq!(body.kind, gatehouse_db::models::ViolationKind::DevTools);
        assert!(body.timestamp.is_none());
    }

    #[test]
    fn monitor_reports_are_readable_by_the_ledger() {
        let sent = ViolationReport {
            kind: gatehouse_db::models::ViolationKind::VisibilityCycling,
            user_id: gatehouse_common::UserId::new(),
            resource_id: uuid::Uuid::new_v4(),
            timestamp: Some(Utc::now()),
        };
        let wire = serde_json::to_value(&sent).unwrap();
        assert_eq!(wire["type"], "visibility_cycling");
        let received: ViolationReport = serde_json::from_value(wire).unwrap();
        assert_eq!(received, sent);
    }
}
