use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Error as SqlxError;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TabulaError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read {}: {reason}", file.display())]
    FileRead { file: PathBuf, reason: String },

    #[error("Query failed: {0}")]
    QueryFailure(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("LLM API error: {0:?}")]
    LlmServerError(LlmError),
}

impl TabulaError {
    pub fn file_read(file: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TabulaError::FileRead {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}

/// Whether an upstream failure is worth another attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TabulaError {
    fn is_retryable(&self) -> bool {
        match self {
            TabulaError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TabulaError::UpstreamStatus(code) => {
                *code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error()
            }
            TabulaError::LlmServerError(err) => err
                .status
                .is_some_and(|s| s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error()),
            _ => false,
        }
    }
}

impl IntoResponse for TabulaError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            TabulaError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody {
                    code: "CONFIGURATION_ERROR".to_string(),
                    message: msg,
                },
            ),
            TabulaError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    code: "BAD_REQUEST".to_string(),
                    message: msg,
                },
            ),
            TabulaError::FileRead { .. } => {
                let message = self.to_string();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiErrorBody {
                        code: "FILE_READ_ERROR".to_string(),
                        message,
                    },
                )
            }
            TabulaError::DatabaseError(_)
            | TabulaError::RactorError(_)
            | TabulaError::Io(_)
            | TabulaError::Json(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorBody {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                },
            ),
            TabulaError::QueryFailure(_)
            | TabulaError::Reqwest(_)
            | TabulaError::UrlParse(_)
            | TabulaError::LlmServerError(_) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorBody {
                    code: "BAD_GATEWAY".to_string(),
                    message: "Upstream service is unavailable.".to_string(),
                },
            ),
            TabulaError::UpstreamStatus(code) => {
                let (err_code, msg) = match code {
                    StatusCode::TOO_MANY_REQUESTS => {
                        ("RATE_LIMIT", "Upstream rate limit exceeded.")
                    }
                    StatusCode::UNAUTHORIZED => ("UNAUTHORIZED", "Upstream authentication failed."),
                    StatusCode::FORBIDDEN => ("FORBIDDEN", "Upstream permission denied."),
                    _ => ("UPSTREAM_ERROR", "An upstream error occurred."),
                };
                (
                    StatusCode::BAD_GATEWAY,
                    ApiErrorBody {
                        code: err_code.to_string(),
                        message: msg.to_string(),
                    },
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// Error envelope returned by OpenAI-compatible endpoints.
#[derive(Deserialize, Debug)]
pub struct LlmError {
    pub error: LlmErrorBody,
    #[serde(skip)]
    pub status: Option<StatusCode>,
}

#[derive(Deserialize, Debug)]
pub struct LlmErrorBody {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
