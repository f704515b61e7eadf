use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a bookable service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Inactive,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opening hours for a single weekday, `open` inclusive and `close` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl DayHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }
}

/// Business hours by weekday. A `None` day is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyHours {
    pub monday: Option<DayHours>,
    pub tuesday: Option<DayHours>,
    pub wednesday: Option<DayHours>,
    pub thursday: Option<DayHours>,
    pub friday: Option<DayHours>,
    pub saturday: Option<DayHours>,
    pub sunday: Option<DayHours>,
}

impl WeeklyHours {
    /// Same hours on all seven days
    pub fn every_day(hours: DayHours) -> Self {
        Self {
            monday: Some(hours),
            tuesday: Some(hours),
            wednesday: Some(hours),
            thursday: Some(hours),
            friday: Some(hours),
            saturday: Some(hours),
            sunday: Some(hours),
        }
    }

    pub fn for_weekday(&self, weekday: Weekday) -> Option<DayHours> {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    /// True when at least one day has a non-empty opening window
    pub fn has_open_day(&self) -> bool {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
        .iter()
        .flatten()
        .any(|hours| hours.open < hours.close)
    }
}

/// A period during which no slot of the service can be booked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Working calendar of a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCalendar {
    #[serde(default)]
    pub weekly_hours: WeeklyHours,
    #[serde(default)]
    pub blackouts: Vec<BlackoutPeriod>,
}

/// A service offered by a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Category used for skill matching during assignment
    pub category: Option<String>,
    pub status: ServiceStatus,
    /// Base price in major currency units
    pub base_price: Decimal,
    pub standard_duration_minutes: i32,
    pub buffer_time_minutes: i32,
    /// 0 means unlimited
    pub max_daily_bookings: i32,
    pub booking_enabled: bool,
    /// `None` falls back to the default 09:00-17:00 calendar
    pub calendar: Option<ServiceCalendar>,
}

impl Service {
    /// Only active, booking-enabled services take part in pricing and conflict checks
    pub fn is_bookable(&self) -> bool {
        self.status == ServiceStatus::Active && self.booking_enabled
    }

    pub fn has_daily_cap(&self) -> bool {
        self.max_daily_bookings > 0
    }
}

/// Booking status enum representing the lifecycle of an appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Statuses that hold a slot on the calendar
    pub const BLOCKING: [BookingStatus; 2] = [BookingStatus::Pending, BookingStatus::Confirmed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_blocking(&self) -> bool {
        Self::BLOCKING.contains(self)
    }
}

impl Default for BookingStatus {
    fn default() -> Self {
        BookingStatus::Pending
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(format!("Invalid booking status: {}", s)),
        }
    }
}

/// An appointment on a service's calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub service_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: BookingStatus,
    pub assigned_team_member_id: Option<Uuid>,
    pub service_request_id: Option<Uuid>,
}

impl Booking {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Service request status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Submitted,
    InReview,
    Approved,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Statuses counted as active workload for a team member
    pub const ACTIVE_WORKLOAD: [RequestStatus; 2] =
        [RequestStatus::Assigned, RequestStatus::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Submitted => "submitted",
            RequestStatus::InReview => "in_review",
            RequestStatus::Approved => "approved",
            RequestStatus::Assigned => "assigned",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// Position in the forward lifecycle, `None` for cancelled
    pub fn rank(&self) -> Option<u8> {
        match self {
            RequestStatus::Submitted => Some(0),
            RequestStatus::InReview => Some(1),
            RequestStatus::Approved => Some(2),
            RequestStatus::Assigned => Some(3),
            RequestStatus::InProgress => Some(4),
            RequestStatus::Completed => Some(5),
            RequestStatus::Cancelled => None,
        }
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        RequestStatus::Submitted
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "submitted" => Ok(RequestStatus::Submitted),
            "in_review" => Ok(RequestStatus::InReview),
            "approved" => Ok(RequestStatus::Approved),
            "assigned" => Ok(RequestStatus::Assigned),
            "in_progress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

/// A client's request for a service, routed to a team member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub status: RequestStatus,
    pub assigned_team_member_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    /// `None` when assigned by the system
    pub assigned_by: Option<Uuid>,
}

impl ServiceRequest {
    pub fn is_assigned(&self) -> bool {
        self.assigned_team_member_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

/// A staff member that can be assigned to service requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TeamMember {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: MemberStatus,
    pub is_available: bool,
    pub specialties: Vec<String>,
}

impl TeamMember {
    pub fn is_assignable(&self) -> bool {
        self.status == MemberStatus::Active && self.is_available
    }

    pub fn has_specialty(&self, category: &str) -> bool {
        self.specialties.iter().any(|s| s == category)
    }
}

/// Exchange rate snapshot, `1 base = rate target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ExchangeRate {
    pub base: String,
    pub target: String,
    pub rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn nine_to_five() -> DayHours {
        DayHours::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_weekly_hours_lookup() {
        let hours = WeeklyHours {
            monday: Some(nine_to_five()),
            ..Default::default()
        };

        assert_eq!(hours.for_weekday(Weekday::Mon), Some(nine_to_five()));
        assert_eq!(hours.for_weekday(Weekday::Sun), None);
        assert!(hours.has_open_day());
        assert!(!WeeklyHours::default().has_open_day());
    }

    #[test]
    fn test_weekly_hours_deserializes_partial_week() {
        let hours: WeeklyHours =
            serde_json::from_str(r#"{"friday": {"open": "10:00:00", "close": "14:00:00"}}"#)
                .unwrap();

        assert!(hours.friday.is_some());
        assert!(hours.monday.is_none());
    }

    #[test]
    fn test_booking_status_round_trip_and_blocking() {
        assert_eq!(BookingStatus::from_str("CONFIRMED").unwrap(), BookingStatus::Confirmed);
        assert!(BookingStatus::from_str("archived").is_err());
        assert!(BookingStatus::Pending.is_blocking());
        assert!(!BookingStatus::Cancelled.is_blocking());
        assert_eq!(serde_json::to_string(&BookingStatus::Pending).unwrap(), "\"pending\"");
    }

    #[test]
    fn test_request_status_serialization() {
        let json = serde_json::to_string(&RequestStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(RequestStatus::from_str("in_review").unwrap(), RequestStatus::InReview);
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Cancelled.rank().is_none());
    }

    #[test]
    fn test_booking_end_time() {
        let booking = Booking {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            scheduled_at: Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap(),
            duration_minutes: 90,
            status: BookingStatus::Pending,
            assigned_team_member_id: None,
            service_request_id: None,
        };

        assert_eq!(booking.ends_at(), Utc.with_ymd_and_hms(2024, 3, 9, 11, 30, 0).unwrap());
    }

    #[test]
    fn test_member_assignability() {
        let mut member = TeamMember {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Dana".to_string(),
            status: MemberStatus::Active,
            is_available: true,
            specialties: vec!["Tax".to_string()],
        };

        assert!(member.is_assignable());
        assert!(member.has_specialty("Tax"));
        assert!(!member.has_specialty("Audit"));

        member.is_available = false;
        assert!(!member.is_assignable());
    }
}
