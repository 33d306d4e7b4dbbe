//! Session handlers: list, inspect, disconnect.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{SessionListResponse, SessionSummaryDto};
use crate::app_state::AppState;
use crate::domain::SessionId;
use crate::error::{ErrorResponse, HubError};

/// `GET /sessions` — List live sessions.
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "Sessions",
    summary = "List sessions",
    responses(
        (status = 200, description = "Live sessions", body = SessionListResponse),
    )
)]
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<SessionSummaryDto> = state
        .hub
        .sessions()
        .await
        .iter()
        .map(|s| SessionSummaryDto::from(s.as_ref()))
        .collect();
    let total = data.len();
    Json(SessionListResponse { data, total })
}

/// `GET /sessions/{id}` — Inspect one session.
///
/// # Errors
///
/// Returns [`HubError::SessionNotFound`] if the session is not live.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "Sessions",
    summary = "Get session",
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionSummaryDto),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let id = SessionId::from(id);
    let session = state
        .hub
        .session(&id)
        .await
        .ok_or(HubError::SessionNotFound(id))?;
    Ok(Json(SessionSummaryDto::from(session.as_ref())))
}

/// `DELETE /sessions/{id}` — Disconnect a session.
///
/// # Errors
///
/// Returns [`HubError::SessionNotFound`] if the session is not live.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{id}",
    tag = "Sessions",
    summary = "Disconnect a session",
    description = "Closes the session. Teardown (group leave, disconnect hooks) runs asynchronously.",
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 202, description = "Disconnect requested"),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    state.hub.disconnect(&SessionId::from(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Session management routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
}
