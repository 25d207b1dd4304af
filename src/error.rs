use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// Wire-level error codes. Every failure leaving the service is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidBody,
    Unauthorized,
    MissingKey,
    MissingConfig,
    GroupPkMismatch,
    IntentDigestMismatch,
    SigningDigestMismatch,
    SessionPolicyDigestMismatch,
    NotVerified,
    MultiPartyNotSupported,
    NotFound,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidBody => "invalid_body",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::MissingKey => "missing_key",
            ErrorCode::MissingConfig => "missing_config",
            ErrorCode::GroupPkMismatch => "group_pk_mismatch",
            ErrorCode::IntentDigestMismatch => "intent_digest_mismatch",
            ErrorCode::SigningDigestMismatch => "signing_digest_mismatch",
            ErrorCode::SessionPolicyDigestMismatch => "session_policy_digest_mismatch",
            ErrorCode::NotVerified => "not_verified",
            ErrorCode::MultiPartyNotSupported => "multi_party_not_supported",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal",
            ErrorCode::Unavailable => "unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidBody
            | ErrorCode::GroupPkMismatch
            | ErrorCode::IntentDigestMismatch
            | ErrorCode::SigningDigestMismatch
            | ErrorCode::SessionPolicyDigestMismatch
            | ErrorCode::MultiPartyNotSupported => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized | ErrorCode::NotVerified => StatusCode::UNAUTHORIZED,
            ErrorCode::MissingKey | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MissingConfig | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidBody, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn missing_key(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingKey, message)
    }

    pub fn missing_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingConfig, message)
    }

    pub fn not_verified(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotVerified, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::internal(format!("Redis error: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::internal(format!("HTTP client error: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::invalid_body(format!("JSON error: {e}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::internal(e.to_string())
    }
}

/// Truncate long messages before they hit the logs.
fn log_message(message: &str) -> &str {
    let mut end = message.len().min(300);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();

        if status.is_server_error() {
            tracing::error!(code = %self.code, "{}", log_message(&self.message));
        } else {
            tracing::debug!(code = %self.code, "{}", log_message(&self.message));
        }

        let body = json!({
            "ok": false,
            "code": self.code.as_str(),
            "message": self.message,
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
