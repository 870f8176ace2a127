use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scout_core::JobAction;
use scout_storage::StoreError;
use serde_json::json;
use tracing::error;

/// JSON error body: `{ success: false, error, message? }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    message: Option<String>,
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            message: None,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: error.into(),
            message: None,
        }
    }

    pub fn internal(error: impl Into<String>, cause: impl Display) -> Self {
        let error = error.into();
        let message = cause.to_string();
        error!(%error, cause = %message, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
            message: Some(message),
        }
    }

    /// Maps a store error; `context` is the 500 headline.
    pub fn store(context: &str, err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(_) => Self::not_found("Job not found"),
            StoreError::ScheduleNotFound(_) => Self::not_found("Schedule not found"),
            StoreError::InvalidTransition { action, .. } => Self::bad_request(match action {
                JobAction::Start => "Job cannot be started (might be already running or completed)",
                JobAction::Pause => "Job cannot be paused (might not be running)",
                JobAction::Cancel => "Job cannot be cancelled",
                JobAction::Complete | JobAction::Fail => "Job is not active",
            }),
            other => Self::internal(context, other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "success": false, "error": self.error });
        if let Some(message) = self.message {
            body["message"] = json!(message);
        }
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
