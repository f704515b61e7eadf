// Error types for the scheduling core

use thiserror::Error;
use uuid::Uuid;

use crate::scheduling::types::ConflictReason;
use crate::store::StoreError;

/// Main error type for the scheduling core
///
/// Pure computations (slot generation, price math) never produce these for
/// valid inputs; data access is the only source of `Upstream` and `Timeout`.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// Referenced entity does not exist or is outside the tenant scope
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: Uuid,
    },

    /// Entity exists but is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Booking rejected by the conflict detector
    #[error("Booking conflict: {reason}")]
    Conflict {
        reason: ConflictReason,
        conflicting_booking_id: Option<Uuid>,
    },

    /// Status change not allowed by the status machine
    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    /// Tenant configuration fails validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller input rejected before any data access
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An external call exceeded the configured bound
    #[error("Operation timed out: {operation}")]
    Timeout {
        operation: &'static str,
    },

    /// Store or cache failure, propagated unmodified
    #[error("Upstream failure: {0}")]
    Upstream(#[from] StoreError),
}

/// Result type alias for scheduling operations
pub type SchedulingResult<T> = Result<T, SchedulingError>;

impl SchedulingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        SchedulingError::NotFound { entity, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let error = SchedulingError::not_found("Service", id);
        assert_eq!(error.to_string(), format!("Service not found: {}", id));

        let error = SchedulingError::Conflict {
            reason: ConflictReason::DailyCap,
            conflicting_booking_id: None,
        };
        assert_eq!(error.to_string(), "Booking conflict: DAILY_CAP");

        let error = SchedulingError::Timeout { operation: "find_service" };
        assert_eq!(error.to_string(), "Operation timed out: find_service");
    }

    #[test]
    fn test_error_from_store() {
        let error: SchedulingError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(error, SchedulingError::Upstream(StoreError::Unavailable(_))));
    }
}
