use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// True faults only. User-facing conditions (a time in the past, no matching
/// appointment, a booked-over slot) are conversational responses, not errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("no account context")]
    MissingAccount,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            AppError::MissingAccount => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the logs and audit trail.
        let message = match &self {
            AppError::Database(_) | AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}
