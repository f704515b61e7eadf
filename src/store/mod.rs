// Storage collaborators
//
// The scheduling core never owns durable state. It reads and writes through the
// `SchedulingStore` trait (a tenant-scoped transactional record store) and keeps
// ephemeral state in a `KeyValueCache`.

pub mod cache;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, ExchangeRate, RequestStatus, Service, ServiceRequest, TeamMember};
use crate::scheduling::conflict::ConflictResult;

pub use cache::{MemoryCache, RedisCache};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failure of an external collaborator (store or cache)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// True when a row owned by `tenant_id` is visible under `scope`
///
/// A `None` scope means tenant isolation is off and every row is visible.
pub fn in_tenant_scope(scope: Option<Uuid>, tenant_id: Uuid) -> bool {
    scope.map_or(true, |scope| scope == tenant_id)
}

/// Selects calendar-blocking (pending or confirmed) bookings of a service
/// whose `scheduled_at` falls in `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuery {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    pub team_member_id: Option<Uuid>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub exclude_booking_id: Option<Uuid>,
}

impl BookingQuery {
    /// Whether a booking satisfies every filter of this query
    pub fn matches(&self, booking: &Booking) -> bool {
        in_tenant_scope(self.tenant_id, booking.tenant_id)
            && booking.service_id == self.service_id
            && booking.status.is_blocking()
            && self
                .team_member_id
                .map_or(true, |member| booking.assigned_team_member_id == Some(member))
            && self.exclude_booking_id != Some(booking.id)
            && booking.scheduled_at >= self.from
            && booking.scheduled_at < self.to
    }
}

/// Data read inside the booking write transaction and handed to the commit guard
#[derive(Debug, Clone)]
pub struct GuardSnapshot {
    pub service: Option<Service>,
    pub overlapping: Vec<Booking>,
    pub same_day_count: i64,
}

/// Re-validation run by the store inside the write transaction
pub type CommitGuard = dyn Fn(&GuardSnapshot) -> ConflictResult + Send + Sync;

/// A booking insert or reschedule together with the scopes its guard reads
#[derive(Debug, Clone)]
pub struct BookingWrite {
    pub booking: Booking,
    pub overlap_scope: BookingQuery,
    /// `None` when the service has no daily cap
    pub day_scope: Option<BookingQuery>,
}

/// Outcome of a guarded booking write
#[derive(Debug, Clone)]
pub enum BookingCommit {
    Saved(Booking),
    Rejected(ConflictResult),
}

/// Conditional assignment update of a service request
#[derive(Debug, Clone)]
pub struct RequestAssignment {
    pub tenant_id: Option<Uuid>,
    pub request_id: Uuid,
    pub team_member_id: Uuid,
    pub status: RequestStatus,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<Uuid>,
    /// Compare-and-swap: only write when the request has no assignee yet
    pub only_if_unassigned: bool,
}

/// Tenant-scoped transactional record store
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn find_service(&self, tenant_id: Option<Uuid>, service_id: Uuid)
        -> StoreResult<Option<Service>>;

    async fn list_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<Vec<Booking>>;

    async fn count_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<i64>;

    async fn find_booking(&self, tenant_id: Option<Uuid>, booking_id: Uuid)
        -> StoreResult<Option<Booking>>;

    /// Insert or update a booking, re-running `guard` on a snapshot read in
    /// the same transaction. Nothing is written when the guard reports a conflict.
    async fn commit_booking(&self, write: &BookingWrite, guard: &CommitGuard)
        -> StoreResult<BookingCommit>;

    /// Compare-and-swap on the current status. Returns `None` when the booking
    /// is missing or its status is no longer `from`.
    async fn update_booking_status(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>>;

    async fn find_service_request(&self, tenant_id: Option<Uuid>, request_id: Uuid)
        -> StoreResult<Option<ServiceRequest>>;

    async fn find_team_member(&self, tenant_id: Option<Uuid>, member_id: Uuid)
        -> StoreResult<Option<TeamMember>>;

    /// Active, available team members
    async fn list_assignable_members(&self, tenant_id: Option<Uuid>)
        -> StoreResult<Vec<TeamMember>>;

    /// Count of assigned / in-progress requests per member; members with no
    /// active work may be absent from the map.
    async fn active_workloads(&self, tenant_id: Option<Uuid>, member_ids: &[Uuid])
        -> StoreResult<HashMap<Uuid, i64>>;

    /// Returns the updated request, or `None` when the conditional update matched nothing
    async fn assign_request(&self, assignment: &RequestAssignment)
        -> StoreResult<Option<ServiceRequest>>;

    /// Most recently fetched rate for `base → target`
    async fn latest_exchange_rate(&self, base: &str, target: &str)
        -> StoreResult<Option<ExchangeRate>>;

    /// Raw settings document of a tenant, `None` when the tenant has none stored
    async fn tenant_settings(&self, tenant_id: Uuid) -> StoreResult<Option<serde_json::Value>>;
}

/// Tenant-scoped key-value cache with TTL
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}
