use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("Unknown account alias: {0}")]
    UnknownAlias(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing linkage metadata {key} on {object_id}")]
    Linkage { object_id: String, key: String },

    #[error("Ledger API error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid event payload: {0}")]
    InvalidEvent(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Required metadata linkage absent on a retrieved object.
    pub fn linkage(object_id: impl Into<String>, key: impl Into<String>) -> Self {
        AppError::Linkage {
            object_id: object_id.into(),
            key: key.into(),
        }
    }
}

/// Webhook signature verification errors
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("missing Ledger-Signature header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    Malformed(String),

    #[error("no signature matched the expected digest")]
    NoMatch,

    #[error("signature timestamp outside tolerance ({age_secs}s)")]
    OutsideTolerance { age_secs: i64 },

    #[error("missing signing secret for alias {0}")]
    MissingSecret(String),
}

/// Remote Ledger API errors. "Not found" is kept distinct from API rejections
/// and transport failures so callers can branch on it.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, detail) = match &self {
            AppError::Signature(e) => (
                StatusCode::BAD_REQUEST,
                "SIGNATURE_VERIFICATION_FAILED",
                "Webhook signature verification failed".to_string(),
                Some(e.to_string()),
            ),
            AppError::UnknownAlias(alias) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_ALIAS",
                format!("Unknown account alias: {}", alias),
                None,
            ),
            AppError::InvalidEvent(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_EVENT",
                "Event payload could not be interpreted".to_string(),
                Some(msg.clone()),
            ),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            AppError::Linkage { object_id, key } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "LINKAGE_MISSING",
                format!("Missing linkage metadata {} on {}", key, object_id),
                None,
            ),
            AppError::Remote(RemoteError::NotFound { kind, id }) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_OBJECT_NOT_FOUND",
                format!("Ledger object not found: {} {}", kind, id),
                None,
            ),
            AppError::Remote(e) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_API_ERROR",
                "Ledger API call failed".to_string(),
                Some(e.to_string()),
            ),
            AppError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                "A configuration error occurred".to_string(),
                Some(msg.clone()),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            detail,
        });

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::InvalidEvent(format!("JSON error: {}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::Config(format!("I/O error: {}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
