use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::cache::CacheError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing required parameters: {0}")]
    MissingParams(String),

    #[error("Invalid exam id")]
    InvalidExamId,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Exam has not started yet (starts at {start_time})")]
    ExamNotStarted { start_time: DateTime<Utc> },

    #[error("Exam is closed")]
    ExamClosed,

    #[error("Attempt limit reached for this exam")]
    AttemptLimitReached,

    #[error("Another active attempt exists for this exam")]
    AnotherActiveAttemptExists,

    #[error("Attempt is already finalized")]
    AttemptLocked,

    #[error("Invalid exam session token")]
    InvalidToken,

    #[error("Another session is already connected to this attempt")]
    AnotherSessionActive,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) | Error::Json(_) => "invalid_request",
            Error::Validation(_) => "validation_failed",
            Error::MissingParams(_) => "missing_params",
            Error::InvalidExamId => "invalid_exam_id",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::ExamNotStarted { .. } => "exam_not_started",
            Error::ExamClosed => "exam_closed",
            Error::AttemptLimitReached => "attempt_limit_reached",
            Error::AnotherActiveAttemptExists => "another_active_attempt_exists",
            Error::AttemptLocked => "attempt_locked",
            Error::InvalidToken => "invalid_token",
            Error::AnotherSessionActive => "another_session_active",
            Error::Cache(_) => "cache_unavailable",
            Error::Config(_) | Error::Database(_) | Error::Anyhow(_) | Error::Internal(_) => {
                "internal_error"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_)
            | Error::Json(_)
            | Error::Validation(_)
            | Error::MissingParams(_)
            | Error::InvalidExamId
            | Error::ExamNotStarted { .. }
            | Error::ExamClosed => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) | Error::InvalidToken => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) | Error::AttemptLimitReached => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AnotherActiveAttemptExists | Error::AnotherSessionActive => StatusCode::CONFLICT,
            Error::AttemptLocked => StatusCode::LOCKED,
            Error::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Database(_) | Error::Anyhow(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            Error::Database(err) => {
                tracing::error!(error = ?err, "database error");
                "An unexpected error occurred".to_string()
            }
            Error::Config(_) | Error::Anyhow(_) | Error::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = match &self {
            Error::ExamNotStarted { start_time } => {
                json!({ "error": code, "message": message, "start_time": start_time })
            }
            _ => json!({ "error": code, "message": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

/// True when the error is a PostgreSQL unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
