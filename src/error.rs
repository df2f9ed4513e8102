//! Error types shared by the SSH layer and the HTTP API.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failures of a single SSH round trip.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH not configured")]
    NotConfigured,

    #[error("SSH connection failed: {0}")]
    Connect(String),

    #[error("SSH authentication failed: {0}")]
    Auth(String),

    #[error("Failed to load SSH key {path}: {reason}")]
    Key { path: String, reason: String },

    #[error("SSH channel error: {0}")]
    Channel(String),

    #[error("SSH command timeout after {millis}ms: {command}")]
    Timeout { millis: u128, command: String },

    #[error("Failed to read {path}: {stderr}")]
    Read { path: String, stderr: String },

    #[error("Failed to write {path}: {stderr}")]
    Write { path: String, stderr: String },
}

impl SshError {
    /// Timeout error carrying the first 80 characters of the command.
    pub fn timeout(millis: u128, command: &str) -> Self {
        Self::Timeout {
            millis,
            command: command.chars().take(80).collect(),
        }
    }
}

/// API error rendered as `{"error": .., "code": ..}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            _ => {
                debug!(error_code = code, message = %message, "Client error");
            }
        }

        (
            status,
            Json(ErrorResponse {
                error: message,
                code,
            }),
        )
            .into_response()
    }
}

impl From<SshError> for ApiError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::NotConfigured => ApiError::BadRequest(err.to_string()),
            SshError::Connect(_) | SshError::Auth(_) | SshError::Timeout { .. } => {
                warn!(error = %err, "remote host unreachable");
                ApiError::BadGateway(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_failures_map_to_gateway_errors() {
        let err: ApiError = SshError::Connect("refused".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: ApiError = SshError::timeout(5000, "echo ok").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "SSH command timeout after 5000ms: echo ok");
    }

    #[test]
    fn not_configured_is_a_client_error() {
        let err: ApiError = SshError::NotConfigured.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "SSH not configured");
    }

    #[test]
    fn timeout_truncates_long_commands() {
        let long = "x".repeat(200);
        let SshError::Timeout { command, .. } = SshError::timeout(1, &long) else {
            panic!("expected timeout");
        };
        assert_eq!(command.len(), 80);
    }

    #[test]
    fn messages_are_rendered_verbatim() {
        assert_eq!(ApiError::bad_request("Invalid action").to_string(), "Invalid action");
        assert_eq!(ApiError::forbidden("blocked").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::conflict("exists").status_code(), StatusCode::CONFLICT);
    }
}
