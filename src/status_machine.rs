use crate::models::{BookingStatus, RequestStatus};

/// Service for validating booking and service request status transitions
pub struct StatusMachine;

impl StatusMachine {
    /// Check if a booking status transition is valid
    ///
    /// # Valid Transitions
    /// - Pending → Confirmed, Cancelled
    /// - Confirmed → Completed, Cancelled
    /// - Completed, Cancelled → (terminal)
    /// - Any status → Same status (idempotent)
    pub fn is_valid_booking_transition(from: BookingStatus, to: BookingStatus) -> bool {
        if from == to {
            return true;
        }

        match (from, to) {
            (BookingStatus::Pending, BookingStatus::Confirmed) => true,
            (BookingStatus::Pending, BookingStatus::Cancelled) => true,
            (BookingStatus::Confirmed, BookingStatus::Completed) => true,
            (BookingStatus::Confirmed, BookingStatus::Cancelled) => true,
            _ => false,
        }
    }

    /// Check if a service request status transition is valid
    ///
    /// Requests move forward through
    /// Submitted → InReview → Approved → Assigned → InProgress → Completed.
    /// Forward skips are allowed (assignment can happen straight from Submitted),
    /// but Completed is only reachable from InProgress. Cancelled is reachable
    /// from every non-terminal status.
    pub fn is_valid_request_transition(from: RequestStatus, to: RequestStatus) -> bool {
        if from == to {
            return true;
        }
        if from.is_terminal() {
            return false;
        }

        match (from.rank(), to) {
            (_, RequestStatus::Cancelled) => true,
            (_, RequestStatus::Completed) => from == RequestStatus::InProgress,
            (Some(from_rank), to) => to.rank().map_or(false, |to_rank| to_rank > from_rank),
            (None, _) => false,
        }
    }

    /// Attempt a booking transition
    pub fn transition_booking(
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<BookingStatus, String> {
        if Self::is_valid_booking_transition(from, to) {
            Ok(to)
        } else {
            Err(format!("Invalid booking status transition from {} to {}", from, to))
        }
    }

    /// Attempt a service request transition
    pub fn transition_request(
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<RequestStatus, String> {
        if Self::is_valid_request_transition(from, to) {
            Ok(to)
        } else {
            Err(format!("Invalid request status transition from {} to {}", from, to))
        }
    }
}
