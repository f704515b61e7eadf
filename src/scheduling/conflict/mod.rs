// Conflict Detector
//
// Decides whether a proposed booking window can be placed on a service's
// calendar. Rules run in a fixed order and the first hit wins:
//   1. the service exists, is active and accepts bookings
//   2. the service's daily cap is not yet reached on that local day
//   3. no blocking booking (buffer-expanded) overlaps the window
//
// The same rules are exposed as a pure evaluation over a `GuardSnapshot` so the
// store can re-run them inside the booking write transaction.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Booking, Service};
use crate::scheduling::availability::{local_date, local_day, TimeWindow};
use crate::scheduling::deadline::CallTimeout;
use crate::scheduling::error::{SchedulingError, SchedulingResult};
use crate::scheduling::metrics::{OperationType, PerformanceMetrics};
use crate::scheduling::settings::SettingsProvider;
use crate::scheduling::types::ConflictReason;
use crate::store::{BookingQuery, BookingWrite, GuardSnapshot, SchedulingStore};

/// Minimum padding around the day window when fetching overlap candidates
const MIN_WINDOW_PAD_MINUTES: i64 = 60;

/// Outcome of a conflict check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictResult {
    pub conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConflictReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_booking_id: Option<Uuid>,
}

impl ConflictResult {
    pub fn clear() -> Self {
        Self {
            conflict: false,
            reason: None,
            conflicting_booking_id: None,
        }
    }

    pub fn conflict(reason: ConflictReason, conflicting_booking_id: Option<Uuid>) -> Self {
        Self {
            conflict: true,
            reason: Some(reason),
            conflicting_booking_id,
        }
    }

    /// Convert a detected conflict into an error, passing clear results through
    pub fn into_result(self) -> SchedulingResult<()> {
        match self.reason {
            Some(reason) if self.conflict => Err(SchedulingError::Conflict {
                reason,
                conflicting_booking_id: self.conflicting_booking_id,
            }),
            _ => Ok(()),
        }
    }
}

/// A proposed booking window
#[derive(Debug, Clone)]
pub struct ConflictRequest {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    pub start: DateTime<Utc>,
    pub duration_minutes: i32,
    /// The booking being moved, ignored by every rule
    pub exclude_booking_id: Option<Uuid>,
    pub team_member_id: Option<Uuid>,
}

impl ConflictRequest {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::from_minutes(self.start, i64::from(self.duration_minutes))
    }
}

/// Rule 1: missing, inactive and booking-disabled services refuse bookings
pub fn service_check(service: Option<&Service>) -> Result<&Service, ConflictResult> {
    match service {
        Some(service) if service.is_bookable() => Ok(service),
        _ => Err(ConflictResult::conflict(ConflictReason::ServiceInactive, None)),
    }
}

/// Rule 2: the same-day count has reached the service cap
pub fn capacity_check(service: &Service, same_day_count: i64) -> Option<ConflictResult> {
    if service.has_daily_cap() && same_day_count >= i64::from(service.max_daily_bookings) {
        return Some(ConflictResult::conflict(ConflictReason::DailyCap, None));
    }
    None
}

/// Rule 3: first candidate whose buffer-expanded window overlaps `proposed`
pub fn overlap_check(
    proposed: &TimeWindow,
    buffer_minutes: i32,
    candidates: &[Booking],
) -> Option<ConflictResult> {
    let buffer = i64::from(buffer_minutes.max(0));
    candidates
        .iter()
        .find(|candidate| TimeWindow::of_booking(candidate).buffered(buffer).overlaps(proposed))
        .map(|candidate| ConflictResult::conflict(ConflictReason::Overlap, Some(candidate.id)))
}

/// Run all three rules over a snapshot, in order
pub fn evaluate(proposed: &TimeWindow, snapshot: &GuardSnapshot) -> ConflictResult {
    let service = match service_check(snapshot.service.as_ref()) {
        Ok(service) => service,
        Err(result) => return result,
    };

    capacity_check(service, snapshot.same_day_count)
        .or_else(|| overlap_check(proposed, service.buffer_time_minutes, &snapshot.overlapping))
        .unwrap_or_else(ConflictResult::clear)
}

/// Commit guard re-validating `proposed` inside the write transaction
pub fn guard_for(proposed: TimeWindow) -> impl Fn(&GuardSnapshot) -> ConflictResult + Send + Sync {
    move |snapshot: &GuardSnapshot| evaluate(&proposed, snapshot)
}

/// Booking queries read by the detector and by the commit guard
#[derive(Debug, Clone)]
pub struct ConflictScopes {
    pub overlap: BookingQuery,
    /// `None` when the service has no daily cap
    pub day: Option<BookingQuery>,
}

impl ConflictScopes {
    /// Overlap candidates come from the local day of the start (stretched to
    /// cover the whole proposed window) padded by `max(buffer, 60)` minutes.
    pub fn build(request: &ConflictRequest, service: &Service, offset: FixedOffset) -> Self {
        let day = local_day(local_date(request.start, offset), offset);
        let proposed = request.window();
        let pad = Duration::minutes(
            i64::from(service.buffer_time_minutes.max(0)).max(MIN_WINDOW_PAD_MINUTES),
        );

        let overlap = BookingQuery {
            tenant_id: request.tenant_id,
            service_id: request.service_id,
            team_member_id: request.team_member_id,
            from: day.start.min(proposed.start) - pad,
            to: day.end.max(proposed.end) + pad,
            exclude_booking_id: request.exclude_booking_id,
        };

        let day = service.has_daily_cap().then(|| BookingQuery {
            tenant_id: request.tenant_id,
            service_id: request.service_id,
            team_member_id: None,
            from: day.start,
            to: day.end,
            exclude_booking_id: request.exclude_booking_id,
        });

        Self { overlap, day }
    }

    /// Pair the scopes with the booking to persist
    pub fn into_write(self, booking: Booking) -> BookingWrite {
        BookingWrite {
            booking,
            overlap_scope: self.overlap,
            day_scope: self.day,
        }
    }
}

/// Conflict Detector
///
/// Read-only. Any store failure propagates; a failed check is never reported
/// as "no conflict".
pub struct ConflictDetector {
    store: Arc<dyn SchedulingStore>,
    settings: Arc<dyn SettingsProvider>,
    timeout: CallTimeout,
    metrics: PerformanceMetrics,
}

impl ConflictDetector {
    /// Create a new ConflictDetector
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        settings: Arc<dyn SettingsProvider>,
        timeout: CallTimeout,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            store,
            settings,
            timeout,
            metrics,
        }
    }

    pub async fn check_conflict(&self, request: &ConflictRequest) -> SchedulingResult<ConflictResult> {
        let _timer = self.metrics.start(OperationType::Conflict);

        if request.duration_minutes <= 0 {
            return Err(SchedulingError::Validation(
                "Booking duration must be positive".to_string(),
            ));
        }

        let service = self
            .timeout
            .run("find_service", self.store.find_service(request.tenant_id, request.service_id))
            .await?;
        let service = match service_check(service.as_ref()) {
            Ok(service) => service,
            Err(result) => {
                tracing::debug!("Service {} is not bookable", request.service_id);
                return Ok(result);
            }
        };

        let settings = self.settings.tenant_settings(Some(service.tenant_id)).await?;
        let scopes = ConflictScopes::build(request, service, settings.offset());

        if let Some(day_scope) = &scopes.day {
            let count = self
                .timeout
                .run("count_blocking_bookings", self.store.count_blocking_bookings(day_scope))
                .await?;
            if let Some(result) = capacity_check(service, count) {
                tracing::debug!(
                    "Service {} reached its daily cap of {}",
                    service.id,
                    service.max_daily_bookings
                );
                return Ok(result);
            }
        }

        let candidates = self
            .timeout
            .run("list_blocking_bookings", self.store.list_blocking_bookings(&scopes.overlap))
            .await?;

        let result = overlap_check(&request.window(), service.buffer_time_minutes, &candidates)
            .unwrap_or_else(ConflictResult::clear);
        if let Some(id) = result.conflicting_booking_id {
            tracing::debug!("Proposed window for service {} overlaps booking {}", service.id, id);
        }
        Ok(result)
    }
}
