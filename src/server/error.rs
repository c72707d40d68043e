//! Error types and response handling for the UI endpoint.
//!
//! Every failure maps to an HTTP status and a JSON body the client can
//! classify: `desync` and `session_expired` force a fresh session, the rest
//! are retried as transport failures.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use crate::collector::InvariantViolation;

use super::session::SessionError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Body was not a valid client message.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The session token is unknown (expired or torn down) and the request
    /// did not ask for a new session.
    #[error("Session '{token}' is unknown or expired")]
    SessionExpired { token: String },

    /// The session's change capture broke; it has been discarded.
    #[error("Session desynchronized: {0}")]
    Desync(#[from] InvariantViolation),

    #[error("Server is shutting down")]
    ShuttingDown,

    /// The exchange task died before producing a response.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::SessionExpired { .. } => StatusCode::GONE,
            ServerError::Desync(_) => StatusCode::CONFLICT,
            ServerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::SessionExpired { .. } => "session_expired",
            ServerError::Desync(_) => "desync",
            ServerError::ShuttingDown => "shutting_down",
            ServerError::Internal(_) => "internal_error",
        }
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Invariant(violation) => ServerError::Desync(violation),
        }
    }
}

/// Builder for standardized error responses.
pub struct ErrorResponse;

impl ErrorResponse {
    pub fn from_error(err: &ServerError, request_id: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": err.error_type(),
                "message": err.to_string(),
                "request_id": request_id
            }
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = err.status_code();
        response.headers_mut().insert(
            CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        response
    }
}
