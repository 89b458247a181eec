//! Call Controller error types.
//!
//! Every signaling operation returns `Result<_, CallError>`. Errors are sent
//! back to the originating client as an `error` event carrying a stable code
//! and a client-safe message; HTTP handlers map the same variants to status
//! codes. Internal details are logged server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Call Controller error type.
///
/// Maps to wire codes / HTTP status:
/// - `NotFound`: `NOT_FOUND` / 404
/// - `Forbidden`: `FORBIDDEN` / 403
/// - `Conflict`: `CONFLICT` / 409
/// - `Unsupported`: `UNSUPPORTED` / 422
/// - `InvalidRequest`: `INVALID_REQUEST` / 400
/// - `EngineFailure`: `ENGINE_FAILURE` / 502
/// - `Internal`: `INTERNAL_ERROR` / 500
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Meeting, room, participant, transport or producer does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the operation (e.g. not the host).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation conflicts with current state (meeting completed,
    /// invitation already outstanding, meeting id taken).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Receiver's capabilities cannot consume the requested producer.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Media engine or session store operation failed.
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// Malformed or semantically invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error (actor mailbox closed, reply dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Returns the stable wire code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            CallError::NotFound(_) => "NOT_FOUND",
            CallError::Forbidden(_) => "FORBIDDEN",
            CallError::Conflict(_) => "CONFLICT",
            CallError::Unsupported(_) => "UNSUPPORTED",
            CallError::EngineFailure(_) => "ENGINE_FAILURE",
            CallError::InvalidRequest(_) => "INVALID_REQUEST",
            CallError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::EngineFailure(_) => "Media operation failed".to_string(),
            CallError::Internal(_) => "An internal error occurred".to_string(),
            CallError::NotFound(msg)
            | CallError::Forbidden(msg)
            | CallError::Conflict(msg)
            | CallError::Unsupported(msg)
            | CallError::InvalidRequest(msg) => msg.clone(),
        }
    }

    /// HTTP status used when the error surfaces through the meeting API.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            CallError::NotFound(_) => StatusCode::NOT_FOUND,
            CallError::Forbidden(_) => StatusCode::FORBIDDEN,
            CallError::Conflict(_) => StatusCode::CONFLICT,
            CallError::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CallError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CallError::EngineFailure(_) => StatusCode::BAD_GATEWAY,
            CallError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the server rather than the caller.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(self, CallError::EngineFailure(_) | CallError::Internal(_))
    }
}

/// Error response body for the HTTP API.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        if self.is_server_fault() {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "cc.api", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}
