//! Session DTOs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ws::session::Session;

/// One live session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummaryDto {
    /// Session identifier.
    pub session_id: String,
    /// Path the connection was upgraded on.
    pub path: String,
    /// Connection timestamp.
    pub connected_at: DateTime<Utc>,
    /// Group the session belongs to, if any.
    pub group_id: Option<String>,
    /// Heartbeat phase (`alive`, `awaiting_pong`, `dead`).
    pub heartbeat: String,
    /// Whether the heartbeat budget is exhausted.
    pub dead: bool,
}

impl From<&Session> for SessionSummaryDto {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id().to_string(),
            path: session.request().path.clone(),
            connected_at: session.connected_at(),
            group_id: session.group_id().map(|id| id.to_string()),
            heartbeat: session.heartbeat().phase().as_str().to_string(),
            dead: session.is_dead(),
        }
    }
}

/// Response body for `GET /sessions`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    /// Live sessions, sorted by ID.
    pub data: Vec<SessionSummaryDto>,
    /// Number of live sessions.
    pub total: usize,
}
