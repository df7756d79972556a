//! Unified API error handling
//!
//! Provides consistent error responses across all endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::WorkflowError;

/// Name of the partial unique index guarding one active request per conversation
pub const ONE_ACTIVE_REQUEST_INDEX: &str = "service_requests_one_active_per_conversation";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// Maps a unique violation on the active-request index to the same
    /// validation error the pre-check produces.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(mapped) =
                Self::from_unique_violation(db_err.is_unique_violation(), db_err.constraint())
            {
                return mapped;
            }
        }
        Self::Database(err)
    }

    fn from_unique_violation(is_unique: bool, constraint: Option<&str>) -> Option<Self> {
        (is_unique && constraint == Some(ONE_ACTIVE_REQUEST_INDEX))
            .then(|| WorkflowError::ActiveRequestExists.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::BadRequest(msg) => msg.clone(),
            Self::Validation { message, .. } => message.clone(),
            // Don't leak internal error details
            Self::Internal(_) | Self::Database(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Forbidden(msg) => Self::Forbidden(msg),
            WorkflowError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Validation {
                field: other.field().map(str::to_string),
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal server error");
            }
            Self::Database(e) => {
                tracing::error!(error = ?e, "Database error");
            }
            _ => {
                tracing::warn!(error = %self, "API error");
            }
        }

        let status = self.status_code();
        let field = match &self {
            Self::Validation { field, .. } => field.clone(),
            _ => None,
        };
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.public_message(),
            field,
            request_id: None,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_errors_map_to_http_statuses() {
        let forbidden: ApiError = WorkflowError::Forbidden("nope".into()).into();
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        let missing: ApiError = WorkflowError::NotFound("gone".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let unpaid: ApiError = WorkflowError::BookingFeeUnpaid.into();
        assert_eq!(unpaid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        match unpaid {
            ApiError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("booking_fee_status"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn active_request_index_violation_is_a_validation_error() {
        let err = ApiError::from_unique_violation(true, Some(ONE_ACTIVE_REQUEST_INDEX))
            .expect("index violation should map");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        match err {
            ApiError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("conversation_id"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(ApiError::from_unique_violation(true, Some("customers_email_key")).is_none());
        assert!(ApiError::from_unique_violation(false, Some(ONE_ACTIVE_REQUEST_INDEX)).is_none());

        let other = ApiError::from_write(sqlx::Error::RowNotFound);
        assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::internal("connection string leaked");
        assert_eq!(err.public_message(), "An internal error occurred");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
