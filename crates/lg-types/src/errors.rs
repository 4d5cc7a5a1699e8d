//! Error types and conversions
//!
//! `AppError` is the single error type threaded through the gateway's core
//! crates. Each variant maps to exactly one of the error kinds in the
//! specification's error handling design and carries enough context to
//! render the shared `{"error": {...}}` JSON body without leaking internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream error: {status}")]
    UpstreamError {
        status: u16,
        body: serde_json::Value,
    },

    #[error("tool '{0}' denied by guardrails")]
    ToolDenied(String),

    #[error("tool '{0}' timed out after {1:?}")]
    ToolTimeout(String, std::time::Duration),

    #[error("tool '{0}' execution failed: {1}")]
    ToolExecutionFailed(String, String),

    #[error("extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("extension '{0}' is disabled")]
    ExtensionDisabled(String),

    #[error("extension execution budget exceeded: {extension}/{step} ({manifest_path}): {message}")]
    ExtensionBudgetExceeded {
        extension: String,
        step: String,
        manifest_path: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

/// OpenAI-compatible error body shared by every failure path.
///
/// `{"error":{"message":...,"type":...,"request_id":...}}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_id: String,
}

impl AppError {
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid_request_error"),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "server_error"),
            AppError::UpstreamError { .. } => (StatusCode::BAD_GATEWAY, "server_error"),
            AppError::ToolDenied(_)
            | AppError::ToolTimeout(_, _)
            | AppError::ToolExecutionFailed(_, _) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::ExtensionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::ExtensionDisabled(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            AppError::ExtensionBudgetExceeded { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::ManifestInvalid(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            AppError::InternalError(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }

    /// Render this error as the client-facing JSON body, tagged with the
    /// request ID that was active when the error was produced.
    pub fn into_response_with_request_id(self, request_id: &str) -> Response {
        let (status, kind) = self.status_and_kind();

        // §4.1/§7: the upstream's own response body is passed through
        // verbatim on a non-2xx upstream reply, rather than wrapped in the
        // gateway's error envelope.
        if let AppError::UpstreamError { body, .. } = &self {
            return (status, Json(body.clone())).into_response();
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: ErrorDetail {
                    message: self.to_string(),
                    kind,
                    request_id: request_id.to_string(),
                },
            }),
        )
            .into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
                    .unwrap_or_else(|_| axum::http::HeaderValue::from_static("1")),
            );
        }
        response
    }
}

/// Fallback `IntoResponse` for call sites without a request ID in scope
/// (e.g. library-level tests). Production handlers should prefer
/// [`AppError::into_response_with_request_id`].
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with_request_id("unknown")
    }
}
