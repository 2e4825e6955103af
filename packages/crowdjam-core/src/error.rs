//! Centralized error types for the Crowdjam core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for GatewayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::MissingToken(_) => "missing_access_token",
            Self::Decode(_) => "gateway_decode_error",
            Self::NotConfigured => "gateway_not_configured",
        }
    }
}

/// Application-wide error type for the Crowdjam engine.
///
/// Everything except `Internal` and `Configuration` is a rejection: it is
/// reported to the participant that issued the command and leaves the session
/// untouched.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum CrowdjamError {
    /// Unknown session, participant or song.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A non-host attempted a host-only action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate ballot or suggestion within a round.
    #[error("Already acted: {0}")]
    AlreadyActed(String),

    /// Session id collision on create.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// External music or recommendation service failed or timed out.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Dequeue with nothing queued.
    #[error("Queue is empty")]
    Empty,

    /// Command is malformed or not valid in the session's current state.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CrowdjamError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::AlreadyActed(_) => "already_acted",
            Self::AlreadyExists(_) => "already_exists",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::Empty => "queue_empty",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::AlreadyActed(_) | Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) | Self::Empty => StatusCode::BAD_REQUEST,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for an unknown session.
    pub(crate) fn session_not_found(session_id: &str) -> Self {
        Self::NotFound(format!("session {}", session_id))
    }
}

/// Convenient Result alias for application-wide operations.
pub type CrowdjamResult<T> = Result<T, CrowdjamError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CrowdjamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for CrowdjamError {
    fn from(err: GatewayError) -> Self {
        Self::GatewayUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_map_to_client_statuses() {
        let err = CrowdjamError::AlreadyActed("genre ballot".into());
        assert_eq!(err.code(), "already_acted");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = CrowdjamError::Forbidden("host only".into());
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        assert_eq!(
            CrowdjamError::session_not_found("ABCD").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn gateway_error_converts_to_gateway_unavailable() {
        let err: CrowdjamError = GatewayError::MissingToken("host-1".into()).into();
        assert_eq!(err.code(), "gateway_unavailable");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn empty_queue_error_message() {
        assert_eq!(CrowdjamError::Empty.to_string(), "Queue is empty");
        assert_eq!(CrowdjamError::Empty.code(), "queue_empty");
    }
}
