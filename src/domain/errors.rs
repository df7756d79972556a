//! Business-rule failures raised by the pure domain layer.
//!
//! These never carry HTTP concerns; `crate::error::ApiError` maps them to
//! 403/404/422 at the boundary.

use thiserror::Error;

use super::service_requests::ServiceRequestStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("An active service request already exists for this conversation")]
    ActiveRequestExists,

    #[error("Cannot {action} a service request that is {from}")]
    InvalidTransition {
        from: ServiceRequestStatus,
        action: &'static str,
    },

    #[error("The booking fee must be paid before the job can be completed")]
    BookingFeeUnpaid,

    #[error("The booking fee has already been paid")]
    BookingFeeAlreadyPaid,

    #[error("The booking fee has not been quoted yet")]
    BookingFeeNotQuoted,

    #[error("The receipt total must be greater than zero")]
    NonPositiveTotal,

    #[error("At most {max} receipt files may be uploaded at once")]
    TooManyAttachments { max: usize },

    #[error("{message}")]
    Invalid { field: String, message: String },
}

impl WorkflowError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Request field the failure should be reported against, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Forbidden(_) | Self::NotFound(_) => None,
            Self::ActiveRequestExists => Some("conversation_id"),
            Self::InvalidTransition { .. } => Some("status"),
            Self::BookingFeeUnpaid | Self::BookingFeeAlreadyPaid => Some("booking_fee_status"),
            Self::BookingFeeNotQuoted => Some("booking_fee_complexity"),
            Self::NonPositiveTotal => Some("items"),
            Self::TooManyAttachments { .. } => Some("receipts"),
            Self::Invalid { field, .. } => Some(field),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
