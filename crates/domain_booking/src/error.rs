//! Booking domain errors

use core_kernel::{MoneyError, PortError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the booking domain
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// Non-positive charge or payment amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Refund amount cannot exceed original payment")]
    RefundExceedsOriginal,

    #[error("Cannot refund incomplete payment")]
    OriginalNotCompleted,

    #[error("Cannot refund a refund")]
    RefundOfRefund,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// The device gateway declined the payment, errored, or timed out
    #[error("Gateway failure: {0}")]
    GatewayFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Machine-readable failure code carried on a failed `PaymentResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    BookingNotFound,
    PaymentNotFound,
    InvalidAmount,
    RefundExceedsOriginal,
    OriginalNotCompleted,
    RefundOfRefund,
    InvalidStateTransition,
    GatewayFailure,
    PersistenceFailure,
}

impl BookingError {
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        BookingError::InvalidAmount(message.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        BookingError::InvalidStateTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Returns the failure code reported to callers
    pub fn kind(&self) -> FailureKind {
        match self {
            BookingError::BookingNotFound(_) => FailureKind::BookingNotFound,
            BookingError::PaymentNotFound(_) => FailureKind::PaymentNotFound,
            BookingError::InvalidAmount(_) | BookingError::Money(_) => FailureKind::InvalidAmount,
            BookingError::RefundExceedsOriginal => FailureKind::RefundExceedsOriginal,
            BookingError::OriginalNotCompleted => FailureKind::OriginalNotCompleted,
            BookingError::RefundOfRefund => FailureKind::RefundOfRefund,
            BookingError::InvalidStateTransition { .. } => FailureKind::InvalidStateTransition,
            BookingError::GatewayFailure(_) => FailureKind::GatewayFailure,
            BookingError::PersistenceFailure(_) => FailureKind::PersistenceFailure,
        }
    }
}

impl From<PortError> for BookingError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } if entity_type == "Payment" => {
                BookingError::PaymentNotFound(id)
            }
            PortError::NotFound { entity_type, id } if entity_type == "Booking" => {
                BookingError::BookingNotFound(id)
            }
            PortError::Validation { message } => BookingError::InvalidAmount(message),
            other => BookingError::PersistenceFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_not_found_maps_by_entity() {
        let err: BookingError = PortError::not_found("Booking", "BKG-1").into();
        assert!(matches!(err, BookingError::BookingNotFound(ref id) if id == "BKG-1"));

        let err: BookingError = PortError::not_found("Payment", "PAY-1").into();
        assert_eq!(err.kind(), FailureKind::PaymentNotFound);
    }

    #[test]
    fn test_connection_error_is_persistence_failure() {
        let err: BookingError = PortError::connection("pool timed out").into();
        assert_eq!(err.kind(), FailureKind::PersistenceFailure);
        assert!(err.to_string().contains("pool timed out"));
    }
}
