use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Message shown to a participant who answers the same question twice.
pub const DUPLICATE_ANSWER_MESSAGE: &str = "You have already submitted an answer for this question.";

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// The participant already has an answer for this question.
    #[error("duplicate answer for question `{question_id}`")]
    DuplicateAnswer { question_id: String },
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("question not found: {0}")]
    QuestionNotFound(String),
    /// Caller is not the session owner.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ServiceError {
    /// Stable machine-readable code sent to socket clients.
    pub fn client_code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::DuplicateAnswer { .. } => "duplicate_answer",
            ServiceError::SessionNotFound(_) => "session_not_found",
            ServiceError::QuestionNotFound(_) => "question_not_found",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::InvalidState(_) => "invalid_state",
        }
    }

    /// Human-readable message that never leaks backend details.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Unavailable(_) => {
                "The service is temporarily unavailable, please try again.".to_owned()
            }
            ServiceError::DuplicateAnswer { .. } => DUPLICATE_ANSWER_MESSAGE.to_owned(),
            ServiceError::SessionNotFound(_) => "Session not found.".to_owned(),
            ServiceError::QuestionNotFound(_) => "Question not found.".to_owned(),
            ServiceError::Unauthorized(message)
            | ServiceError::InvalidInput(message)
            | ServiceError::InvalidState(message) => message.clone(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("{0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::DuplicateAnswer { .. } => {
                AppError::Conflict(DUPLICATE_ANSWER_MESSAGE.to_owned())
            }
            ServiceError::SessionNotFound(message) => {
                AppError::NotFound(format!("session `{message}`"))
            }
            ServiceError::QuestionNotFound(message) => {
                AppError::NotFound(format!("question `{message}`"))
            }
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
