// Availability Generator
//
// Produces candidate bookable slots for a service over a date range. Slots are
// laid out inside the service's weekly business hours on the tenant's local
// calendar days and marked unavailable when they collide with a blocking
// booking (buffer included), a blackout period, or a day at its booking cap.
//
// The half-open window primitives here are shared with the conflict detector.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{BlackoutPeriod, Booking, DayHours, Service, WeeklyHours};
use crate::scheduling::deadline::CallTimeout;
use crate::scheduling::error::{SchedulingError, SchedulingResult};
use crate::scheduling::metrics::{OperationType, PerformanceMetrics};
use crate::scheduling::settings::SettingsProvider;
use crate::store::{BookingQuery, SchedulingStore};

/// Shortest slot the generator will lay out
pub const MIN_SLOT_MINUTES: i64 = 15;

/// Longest range accepted by a single availability request
pub const MAX_RANGE_DAYS: i64 = 92;

/// Half-open interval of UTC instants `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_minutes(start: DateTime<Utc>, minutes: i64) -> Self {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn of_booking(booking: &Booking) -> Self {
        Self::new(booking.scheduled_at, booking.ends_at())
    }

    /// Touching windows do not overlap
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Widen the window by `minutes` on both ends
    pub fn buffered(&self, minutes: i64) -> Self {
        Self::new(
            self.start - Duration::minutes(minutes),
            self.end + Duration::minutes(minutes),
        )
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// UTC instant of a local wall-clock time at `offset`
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local: NaiveDateTime = date.and_time(time);
    Utc.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64)))
}

/// Local calendar date of `instant` at `offset`
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// The local calendar day containing `date`, as UTC instants
pub fn local_day(date: NaiveDate, offset: FixedOffset) -> TimeWindow {
    let start = local_to_utc(date, NaiveTime::MIN, offset);
    TimeWindow::new(start, start + Duration::days(1))
}

/// Hours used when a service has no calendar configured
pub fn default_business_hours() -> WeeklyHours {
    let open = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
    let close = NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN);
    WeeklyHours::every_day(DayHours::new(open, close))
}

/// A candidate slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

/// Inputs to the pure slot layout
#[derive(Debug, Clone)]
pub struct SlotPlan<'a> {
    pub range: TimeWindow,
    pub offset: FixedOffset,
    pub slot_minutes: i64,
    pub hours: &'a WeeklyHours,
    pub blackouts: &'a [BlackoutPeriod],
    pub buffer_minutes: i64,
    pub max_daily_bookings: i32,
    /// Blocking bookings of the service around the range
    pub bookings: &'a [Booking],
    /// Only bookings of this member block a slot; the daily cap still counts all
    pub team_member_id: Option<Uuid>,
    /// An unbookable service yields slots that are all unavailable
    pub bookable: bool,
}

/// Lay out slots day by day, in chronological order
pub fn generate_slots(plan: &SlotPlan<'_>) -> Vec<Slot> {
    let mut slots = Vec::new();
    if plan.range.start > plan.range.end || plan.slot_minutes <= 0 {
        return slots;
    }

    let slot_length = Duration::minutes(plan.slot_minutes);
    let last_day = local_date(plan.range.end, plan.offset);
    let mut day = local_date(plan.range.start, plan.offset);

    while day <= last_day {
        if let Some(hours) = plan.hours.for_weekday(day.weekday()).filter(|h| h.open < h.close) {
            let day_full = plan.max_daily_bookings > 0
                && count_on_day(plan.bookings, day, plan.offset) >= plan.max_daily_bookings as usize;

            let close = local_to_utc(day, hours.close, plan.offset);
            let mut start = local_to_utc(day, hours.open, plan.offset);

            while start + slot_length <= close {
                let window = TimeWindow::new(start, start + slot_length);
                if window.start >= plan.range.start && window.end <= plan.range.end {
                    let available = plan.bookable
                        && !day_full
                        && !blocked_by_booking(plan, &window)
                        && !blocked_by_blackout(plan.blackouts, &window);
                    slots.push(Slot {
                        start: window.start,
                        end: window.end,
                        available,
                    });
                }
                start = window.end;
            }
        }

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    slots
}

fn count_on_day(bookings: &[Booking], day: NaiveDate, offset: FixedOffset) -> usize {
    let window = local_day(day, offset);
    bookings.iter().filter(|b| window.contains(b.scheduled_at)).count()
}

fn blocked_by_booking(plan: &SlotPlan<'_>, window: &TimeWindow) -> bool {
    plan.bookings
        .iter()
        .filter(|b| {
            plan.team_member_id
                .map_or(true, |member| b.assigned_team_member_id == Some(member))
        })
        .any(|b| TimeWindow::of_booking(b).buffered(plan.buffer_minutes).overlaps(window))
}

fn blocked_by_blackout(blackouts: &[BlackoutPeriod], window: &TimeWindow) -> bool {
    blackouts
        .iter()
        .any(|period| TimeWindow::new(period.start, period.end).overlaps(window))
}

/// Availability request
#[derive(Debug, Clone)]
pub struct AvailabilityRequest {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub slot_minutes: Option<i32>,
    pub team_member_id: Option<Uuid>,
}

/// Availability Generator
///
/// Read-only; never writes to the store or the cache.
pub struct AvailabilityGenerator {
    store: Arc<dyn SchedulingStore>,
    settings: Arc<dyn SettingsProvider>,
    timeout: CallTimeout,
    metrics: PerformanceMetrics,
}

impl AvailabilityGenerator {
    /// Create a new AvailabilityGenerator
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

    /// Compute slots for a service between `from` and `to`
    ///
    /// Missing services are `NotFound`. A calendar with no open day gives an
    /// empty list.
    pub async fn compute_availability(&self, request: &AvailabilityRequest) -> SchedulingResult<Vec<Slot>> {
        let _timer = self.metrics.start(OperationType::Availability);

        if request.from > request.to {
            return Err(SchedulingError::Validation(
                "Availability range start must not be after its end".to_string(),
            ));
        }
        if request.to - request.from > Duration::days(MAX_RANGE_DAYS) {
            return Err(SchedulingError::Validation(format!(
                "Availability range cannot exceed {} days",
                MAX_RANGE_DAYS
            )));
        }

        let service = self
            .timeout
            .run("find_service", self.store.find_service(request.tenant_id, request.service_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("Service", request.service_id))?;

        let default_hours;
        let (hours, blackouts): (&WeeklyHours, &[BlackoutPeriod]) = match &service.calendar {
            Some(calendar) => (&calendar.weekly_hours, calendar.blackouts.as_slice()),
            None => {
                default_hours = default_business_hours();
                (&default_hours, &[])
            }
        };

        if !hours.has_open_day() {
            tracing::warn!(
                "Service {} has no open business hours; no availability generated",
                service.id
            );
            return Ok(Vec::new());
        }

        if !service.is_bookable() {
            tracing::debug!("Service {} is not bookable; all slots unavailable", service.id);
        }

        let settings = self.settings.tenant_settings(Some(service.tenant_id)).await?;
        let offset = settings.offset();
        let bookings = self.load_bookings(request, &service, offset).await?;

        let slot_minutes = request
            .slot_minutes
            .map(i64::from)
            .unwrap_or(i64::from(service.standard_duration_minutes))
            .max(MIN_SLOT_MINUTES);

        let plan = SlotPlan {
            range: TimeWindow::new(request.from, request.to),
            offset,
            slot_minutes,
            hours,
            blackouts,
            buffer_minutes: i64::from(service.buffer_time_minutes.max(0)),
            max_daily_bookings: service.max_daily_bookings,
            bookings: &bookings,
            team_member_id: request.team_member_id,
            bookable: service.is_bookable(),
        };

        let slots = generate_slots(&plan);
        tracing::debug!(
            "Generated {} slots for service {} ({} available)",
            slots.len(),
            service.id,
            slots.iter().filter(|s| s.available).count()
        );
        Ok(slots)
    }

    /// Blocking bookings of the service covering every local day of the range,
    /// padded by the buffer so neighbours across midnight are seen
    async fn load_bookings(
        &self,
        request: &AvailabilityRequest,
        service: &Service,
        offset: FixedOffset,
    ) -> SchedulingResult<Vec<Booking>> {
        let pad = Duration::minutes(i64::from(service.buffer_time_minutes.max(0)).max(60));
        let first_day = local_day(local_date(request.from, offset), offset);
        let last_day = local_day(local_date(request.to, offset), offset);

        let query = BookingQuery {
            tenant_id: request.tenant_id,
            service_id: service.id,
            team_member_id: None,
            from: first_day.start - pad,
            to: last_day.end + pad,
            exclude_booking_id: None,
        };

        self.timeout
            .run("list_blocking_bookings", self.store.list_blocking_bookings(&query))
            .await
    }
}
