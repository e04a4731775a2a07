use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

pub type ControlResult<T> = Result<T, ControlError>;

/// Failures raised by document-control and competency commands.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{entity} is {current}, expected {required}")]
    InvalidStateTransition {
        entity: &'static str,
        current: String,
        required: &'static str,
    },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("not permitted to {0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("notification failed: {0}")]
    Notification(String),
}

impl ControlError {
    pub fn invalid_transition(
        entity: &'static str,
        current: impl Into<String>,
        required: &'static str,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            current: current.into(),
            required,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<diesel::result::Error> for ControlError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => ControlError::NotFound("record"),
            other => ControlError::Database(other),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<ControlError> for AppError {
    fn from(value: ControlError) -> Self {
        let status = match &value {
            ControlError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Forbidden(_) => StatusCode::FORBIDDEN,
            ControlError::Validation(_) => StatusCode::BAD_REQUEST,
            ControlError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Notification(_) => StatusCode::BAD_GATEWAY,
            ControlError::Database(_) | ControlError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, value.to_string())
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let err: AppError =
            ControlError::invalid_transition("revision", "draft", "under_review").into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message, "revision is draft, expected under_review");
    }

    #[test]
    fn diesel_not_found_stays_distinct_from_state_errors() {
        let err = ControlError::from(diesel::result::Error::NotFound);
        assert!(matches!(err, ControlError::NotFound(_)));
        let app: AppError = err.into();
        assert_eq!(app.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn configuration_errors_report_unavailable() {
        let app: AppError = ControlError::Configuration("email not configured".into()).into();
        assert_eq!(app.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
