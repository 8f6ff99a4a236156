//! Handlers for the `/submissions` resource.
//!
//! Both endpoints are thin: intake and the read path live in
//! [`SubmissionIntake`](crate::intake::SubmissionIntake) and
//! [`StatusReader`](crate::reader::StatusReader).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use codearena_core::error::CoreError;
use codearena_core::{NewSubmission, SubmissionId};
use serde::Deserialize;

use crate::error::{rate_limit_headers, AppResult};
use crate::state::AppState;

/// Header carrying the caller's session id when it is not in the body or query.
pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// Caller identity: body `sessionId`, then query `sessionId`, then the
/// `x-session-id` header. Blank values are skipped.
pub fn resolve_identity(
    body: Option<&str>,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Option<String> {
    let header = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok());
    [body, query, header]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/submissions
///
/// Accept code for execution. Returns 202 with `{submissionId, status}` and
/// the caller's `X-RateLimit-*` headers; progress then arrives over `/ws`.
pub async fn create_submission(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    payload: Result<Json<NewSubmission>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload.map_err(|e| CoreError::Validation(e.body_text()))?;

    let identity = resolve_identity(
        input.session_id.as_deref(),
        query.session_id.as_deref(),
        &headers,
    );

    let receipt = state.intake.submit(identity.as_deref(), input).await?;
    let rate_headers = rate_limit_headers(&receipt.rate);

    Ok((StatusCode::ACCEPTED, rate_headers, Json(receipt)))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/submissions/{id}
///
/// Current status of a submission, from the result cache when terminal.
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.reader.fetch(&SubmissionId::new(id)).await?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(session: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(s) = session {
            map.insert(SESSION_HEADER, HeaderValue::from_str(s).unwrap());
        }
        map
    }

    #[test]
    fn body_takes_precedence() {
        let id = resolve_identity(Some("body"), Some("query"), &headers(Some("header")));
        assert_eq!(id.as_deref(), Some("body"));
    }

    #[test]
    fn falls_back_to_query_then_header() {
        assert_eq!(
            resolve_identity(None, Some("query"), &headers(Some("header"))).as_deref(),
            Some("query")
        );
        assert_eq!(
            resolve_identity(Some("  "), None, &headers(Some("header"))).as_deref(),
            Some("header")
        );
    }

    #[test]
    fn no_identity_anywhere() {
        assert_eq!(resolve_identity(None, None, &headers(None)), None);
    }
}
