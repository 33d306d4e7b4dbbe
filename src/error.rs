//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the central error type for the hub. Transport and
//! codec failures have their own enums ([`TransportError`],
//! [`CodecError`]) so the pluggable collaborators can report them
//! without depending on the rest of the hub.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{GroupId, SessionId};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "group not found: 6f1c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Failure reported by a transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection, or the session was closed locally.
    #[error("connection closed")]
    Closed,

    /// Any other I/O or protocol failure.
    #[error("transport error: {0}")]
    Io(String),
}

/// Failure reported by a serialization collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The payload could not be decoded into a routed message.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The message could not be encoded into a frame.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Hub-wide error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                  |
/// |-----------|-------------------|------------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request              |
/// | 2000–2999 | State / Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server / Transport| 500 / 502 / 504              |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// No group with the given ID exists in either partition.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// The targeted group is in the full partition.
    #[error("group already exceeds its capacity: {0}")]
    GroupFull(GroupId),

    /// The session already belongs to a group.
    #[error("session already belongs to group {0}")]
    AlreadyInGroup(GroupId),

    /// No live session with the given ID exists.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session was closed and can no longer join a group.
    #[error("session closed: {0}")]
    SessionClosed(SessionId),

    /// A write to the session did not complete within the send timeout.
    #[error("send to session {0} timed out")]
    SendTimeout(SessionId),

    /// Error propagated from the transport collaborator.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Error propagated from the serialization collaborator.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Hub configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Codec(_) => 1001,
            Self::InvalidConfig(_) => 1002,
            Self::GroupNotFound(_) => 2001,
            Self::GroupFull(_) => 2002,
            Self::AlreadyInGroup(_) => 2003,
            Self::SessionNotFound(_) => 2004,
            Self::SessionClosed(_) => 2005,
            Self::Internal(_) => 3000,
            Self::Transport(_) => 3001,
            Self::SendTimeout(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Codec(_) | Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::GroupNotFound(_) | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::GroupFull(_) | Self::AlreadyInGroup(_) | Self::SessionClosed(_) => {
                StatusCode::CONFLICT
            }
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::SendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
