// Scheduling Core Module
//
// Booking and assignment decisions for a multi-tenant service business:
// - Availability: bookable slots of a service within a date range
// - Conflict detection: overlap, buffer, daily cap and inactive-service rules
// - Pricing: base price, surcharges, promotions and currency conversion
// - Auto-assignment: routing service requests to team members
//
// Durable state lives behind the store collaborator; the engines are
// stateless per call.

pub mod error;
pub mod types;
pub mod deadline;
pub mod settings;
pub mod availability;
pub mod conflict;
pub mod pricing;
pub mod assignment;
pub mod audit;
pub mod notify;
pub mod handlers;
pub mod metrics;

pub use error::{SchedulingError, SchedulingResult};
pub use types::{AssignmentStrategy, ConflictReason, DiscountType, PriceComponentCode};
pub use deadline::{CallTimeout, DEFAULT_CALL_TIMEOUT};
pub use settings::{
    HourRange,
    PricingSettings,
    SettingsProvider,
    StaticSettings,
    StoreSettingsProvider,
    TenantSettings,
};
pub use availability::{AvailabilityGenerator, AvailabilityRequest, Slot, TimeWindow};
pub use conflict::{ConflictDetector, ConflictRequest, ConflictResult};
pub use pricing::{
    promotions::{NoPromotions, PgPromotionResolver, Promotion, PromotionResolver, StaticPromotions},
    PriceBreakdown,
    PriceComponent,
    PriceRequest,
    PricingEngine,
    PricingOptions,
};
pub use assignment::{AssignmentEngine, AssignmentOutcome, UnchangedReason};
pub use audit::{AuditEntry, AuditSink, LogAuditLogger, MemoryAuditLog, PgAuditLogger};
pub use notify::{AssignmentEvent, Broadcaster, ChannelBroadcaster, LogBroadcaster};
pub use metrics::{MetricsSummary, PerformanceMetrics};

// Scheduling Engine - Orchestrator
//
// Wires the four engines to shared collaborators and runs the booking workflows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Service, ServiceRequest};
use crate::status_machine::StatusMachine;
use crate::store::{BookingCommit, KeyValueCache, SchedulingStore};
use conflict::{guard_for, ConflictScopes};

/// Shared collaborators of the engines
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SchedulingStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub settings: Arc<dyn SettingsProvider>,
    pub promotions: Arc<dyn PromotionResolver>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: PerformanceMetrics,
}

/// Engine-wide options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub call_timeout: CallTimeout,
    pub default_currency: String,
    /// Restrict assignment candidates to the request's tenant
    pub multi_tenant: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            call_timeout: CallTimeout::default(),
            default_currency: pricing::DEFAULT_CURRENCY.to_string(),
            multi_tenant: true,
        }
    }
}

/// A booking to create
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    /// Defaults to the service's standard duration
    pub duration_minutes: Option<i32>,
    pub team_member_id: Option<Uuid>,
    /// Service request auto-assigned once the booking is saved
    pub service_request_id: Option<Uuid>,
    pub options: PricingOptions,
}

/// A saved booking with its quote
#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub price: PriceBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentOutcome>,
}

/// Scheduling Engine
///
/// Orchestrates availability, conflict detection, pricing and assignment, and
/// records every state change to the audit sink.
pub struct SchedulingEngine {
    availability: AvailabilityGenerator,
    conflicts: ConflictDetector,
    pricing: PricingEngine,
    assignment: AssignmentEngine,
    store: Arc<dyn SchedulingStore>,
    settings: Arc<dyn SettingsProvider>,
    audit: Arc<dyn AuditSink>,
    timeout: CallTimeout,
    metrics: PerformanceMetrics,
}

impl SchedulingEngine {
    /// Create a new SchedulingEngine, wiring the four components to shared collaborators
    pub fn new(parts: Collaborators, options: EngineOptions) -> Self {
        let timeout = options.call_timeout;
        let Collaborators {
            store,
            cache,
            settings,
            promotions,
            broadcaster,
            audit,
            metrics,
        } = parts;

        Self {
            availability: AvailabilityGenerator::new(
                store.clone(),
                settings.clone(),
                timeout,
                metrics.clone(),
            ),
            conflicts: ConflictDetector::new(store.clone(), settings.clone(), timeout, metrics.clone()),
            pricing: PricingEngine::new(
                store.clone(),
                settings.clone(),
                promotions,
                timeout,
                metrics.clone(),
            )
            .with_default_currency(&options.default_currency),
            assignment: AssignmentEngine::new(
                store.clone(),
                cache,
                settings.clone(),
                broadcaster,
                timeout,
                metrics.clone(),
            )
            .with_multi_tenant(options.multi_tenant),
            store,
            settings,
            audit,
            timeout,
            metrics,
        }
    }

    /// Get performance metrics
    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Pre-load the settings of `tenants` into the cache
    ///
    /// Returns how many tenants were loaded. A tenant whose settings fail to
    /// load is logged and skipped.
    pub async fn warm_cache(&self, tenants: &[Uuid]) -> usize {
        tracing::info!("Warming tenant settings cache for {} tenants...", tenants.len());

        let mut loaded = 0;
        for tenant in tenants {
            match self.settings.tenant_settings(Some(*tenant)).await {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!("Failed to warm settings of tenant {}: {}", tenant, e),
            }
        }

        tracing::info!("Tenant settings cache warmed ({}/{})", loaded, tenants.len());
        loaded
    }

    pub async fn compute_availability(&self, request: &AvailabilityRequest) -> SchedulingResult<Vec<Slot>> {
        self.availability.compute_availability(request).await
    }

    pub async fn check_conflict(&self, request: &ConflictRequest) -> SchedulingResult<ConflictResult> {
        self.conflicts.check_conflict(request).await
    }

    pub async fn calculate_price(&self, request: &PriceRequest) -> SchedulingResult<PriceBreakdown> {
        self.pricing.calculate_price(request).await
    }

    /// Auto-assign a service request and audit the assignment
    pub async fn auto_assign(&self, tenant_id: Option<Uuid>, request_id: Uuid) -> SchedulingResult<AssignmentOutcome> {
        let outcome = self.assignment.auto_assign(tenant_id, request_id).await?;
        if let AssignmentOutcome::Assigned { request, strategy } = &outcome {
            self.audit_assignment(request, Some(*strategy)).await;
        }
        Ok(outcome)
    }

    /// Manually (re)assign a service request and audit the change
    pub async fn reassign_request(
        &self,
        tenant_id: Option<Uuid>,
        request_id: Uuid,
        member_id: Uuid,
        assigned_by: Option<Uuid>,
    ) -> SchedulingResult<ServiceRequest> {
        let request = self
            .assignment
            .reassign_request(tenant_id, request_id, member_id, assigned_by)
            .await?;
        self.audit_assignment(&request, None).await;
        Ok(request)
    }

    /// Create a booking
    ///
    /// Conflict check, quote, then a guarded write that re-runs the conflict
    /// rules inside the store transaction. A linked service request is
    /// auto-assigned afterwards; assignment failures never undo the booking.
    pub async fn create_booking(&self, request: &BookingRequest) -> SchedulingResult<BookingConfirmation> {
        if matches!(request.duration_minutes, Some(minutes) if minutes <= 0) {
            return Err(SchedulingError::Validation(
                "Booking duration must be positive".to_string(),
            ));
        }

        let service = self
            .timeout
            .run("find_service", self.store.find_service(request.tenant_id, request.service_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("Service", request.service_id))?;
        let duration_minutes = request
            .duration_minutes
            .unwrap_or(service.standard_duration_minutes);

        let conflict_request = ConflictRequest {
            tenant_id: request.tenant_id,
            service_id: service.id,
            start: request.scheduled_at,
            duration_minutes,
            exclude_booking_id: None,
            team_member_id: request.team_member_id,
        };
        self.conflicts.check_conflict(&conflict_request).await?.into_result()?;

        let price = self
            .pricing
            .calculate_price(&PriceRequest {
                tenant_id: request.tenant_id,
                service_id: service.id,
                scheduled_at: request.scheduled_at,
                duration_minutes: Some(duration_minutes),
                options: request.options.clone(),
            })
            .await?;
        if !price.is_usable() {
            return Err(SchedulingError::InvalidState(format!(
                "Service {} cannot be quoted",
                service.id
            )));
        }

        if let Some(request_id) = request.service_request_id {
            let linked = self
                .timeout
                .run("find_service_request", self.store.find_service_request(request.tenant_id, request_id))
                .await?
                .ok_or_else(|| SchedulingError::not_found("ServiceRequest", request_id))?;
            if linked.service_id != service.id {
                return Err(SchedulingError::Validation(format!(
                    "Service request {} is for another service",
                    request_id
                )));
            }
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            tenant_id: service.tenant_id,
            service_id: service.id,
            scheduled_at: request.scheduled_at,
            duration_minutes,
            status: BookingStatus::Pending,
            assigned_team_member_id: request.team_member_id,
            service_request_id: request.service_request_id,
        };
        let booking = self.commit(&conflict_request, &service, booking).await?;

        tracing::info!(
            "Created booking {} for service {} at {} ({} {})",
            booking.id,
            service.id,
            booking.scheduled_at,
            price.total_cents,
            price.currency
        );
        self.audit
            .record(AuditEntry {
                tenant_id: Some(booking.tenant_id),
                entity: "booking",
                entity_id: booking.id,
                action: "created",
                data: json!({
                    "service_id": booking.service_id,
                    "scheduled_at": booking.scheduled_at,
                    "duration_minutes": booking.duration_minutes,
                    "total_cents": price.total_cents,
                    "currency": &price.currency,
                    "components": price.components.len(),
                }),
                effect: format!(
                    "Booking created at {} {}",
                    format_cents(price.total_cents),
                    price.currency
                ),
            })
            .await;

        let assignment = match booking.service_request_id {
            Some(request_id) => match self.auto_assign(request.tenant_id, request_id).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::warn!(
                        "Auto-assign of request {} after booking {} failed: {}",
                        request_id,
                        booking.id,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Ok(BookingConfirmation {
            booking,
            price,
            assignment,
        })
    }

    /// Move a pending or confirmed booking to a new start (and duration)
    pub async fn reschedule_booking(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: Option<i32>,
    ) -> SchedulingResult<Booking> {
        let booking = self.load_booking(tenant_id, booking_id).await?;
        if !booking.status.is_blocking() {
            return Err(SchedulingError::InvalidState(format!(
                "Cannot reschedule a {} booking",
                booking.status
            )));
        }

        let conflict_request = ConflictRequest {
            tenant_id,
            service_id: booking.service_id,
            start: scheduled_at,
            duration_minutes: duration_minutes.unwrap_or(booking.duration_minutes),
            exclude_booking_id: Some(booking.id),
            team_member_id: booking.assigned_team_member_id,
        };
        self.conflicts.check_conflict(&conflict_request).await?.into_result()?;

        let service = self
            .timeout
            .run("find_service", self.store.find_service(tenant_id, booking.service_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("Service", booking.service_id))?;

        let previous = booking.scheduled_at;
        let moved = Booking {
            scheduled_at,
            duration_minutes: conflict_request.duration_minutes,
            ..booking
        };
        let moved = self.commit(&conflict_request, &service, moved).await?;

        tracing::info!("Rescheduled booking {} from {} to {}", moved.id, previous, moved.scheduled_at);
        self.audit
            .record(AuditEntry {
                tenant_id: Some(moved.tenant_id),
                entity: "booking",
                entity_id: moved.id,
                action: "rescheduled",
                data: json!({
                    "from": previous,
                    "to": moved.scheduled_at,
                    "duration_minutes": moved.duration_minutes,
                }),
                effect: format!("Booking moved to {}", moved.scheduled_at),
            })
            .await;

        Ok(moved)
    }

    /// Change a booking's status
    ///
    /// Setting the current status again is a no-op.
    pub async fn transition_booking(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        to: BookingStatus,
    ) -> SchedulingResult<Booking> {
        let booking = self.load_booking(tenant_id, booking_id).await?;
        StatusMachine::transition_booking(booking.status, to).map_err(SchedulingError::InvalidTransition)?;
        if booking.status == to {
            return Ok(booking);
        }

        let from = booking.status;
        let updated = self
            .timeout
            .run(
                "update_booking_status",
                self.store.update_booking_status(tenant_id, booking_id, from, to),
            )
            .await?
            .ok_or_else(|| {
                SchedulingError::InvalidState(format!("Booking {} changed concurrently", booking_id))
            })?;

        tracing::info!("Booking {} moved from {} to {}", updated.id, from, to);
        self.audit
            .record(AuditEntry {
                tenant_id: Some(updated.tenant_id),
                entity: "booking",
                entity_id: updated.id,
                action: "status_changed",
                data: json!({ "from": from, "to": to }),
                effect: format!("Booking {}", to),
            })
            .await;

        Ok(updated)
    }

    async fn load_booking(&self, tenant_id: Option<Uuid>, booking_id: Uuid) -> SchedulingResult<Booking> {
        self.timeout
            .run("find_booking", self.store.find_booking(tenant_id, booking_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("Booking", booking_id))
    }

    /// Guarded write of `booking` in the window described by `request`
    async fn commit(
        &self,
        request: &ConflictRequest,
        service: &Service,
        booking: Booking,
    ) -> SchedulingResult<Booking> {
        let settings = self.settings.tenant_settings(Some(service.tenant_id)).await?;
        let write = ConflictScopes::build(request, service, settings.offset()).into_write(booking);
        let guard = guard_for(request.window());

        let commit = self
            .timeout
            .run("commit_booking", self.store.commit_booking(&write, &guard))
            .await?;

        match commit {
            BookingCommit::Saved(booking) => Ok(booking),
            BookingCommit::Rejected(result) => {
                tracing::warn!(
                    "Booking {} rejected at commit: {:?}",
                    write.booking.id,
                    result.reason
                );
                Err(result.into_result().err().unwrap_or_else(|| {
                    SchedulingError::InvalidState("Booking write was rejected".to_string())
                }))
            }
        }
    }

    async fn audit_assignment(&self, request: &ServiceRequest, strategy: Option<AssignmentStrategy>) {
        let Some(member_id) = request.assigned_team_member_id else {
            return;
        };

        let (action, effect) = match strategy {
            Some(strategy) => ("auto_assigned", format!("Assigned to {} ({})", member_id, strategy)),
            None => ("reassigned", format!("Assigned to {}", member_id)),
        };
        self.audit
            .record(AuditEntry {
                tenant_id: Some(request.tenant_id),
                entity: "service_request",
                entity_id: request.id,
                action,
                data: json!({
                    "team_member_id": member_id,
                    "status": request.status,
                    "strategy": strategy,
                    "assigned_by": request.assigned_by,
                }),
                effect,
            })
            .await;
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemberStatus, RequestStatus, ServiceStatus, TeamMember};
    use crate::store::memory::SlowStore;
    use crate::store::{MemoryCache, MemoryStore};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn tenant() -> Uuid {
        Uuid::from_u128(1)
    }

    fn service() -> Service {
        Service {
            id: Uuid::from_u128(10),
            tenant_id: tenant(),
            name: "Consultation".to_string(),
            category: Some("Tax".to_string()),
            status: ServiceStatus::Active,
            base_price: dec!(100.00),
            standard_duration_minutes: 60,
            buffer_time_minutes: 0,
            max_daily_bookings: 0,
            booking_enabled: true,
            calendar: None,
        }
    }

    fn member(id: u128) -> TeamMember {
        TeamMember {
            id: Uuid::from_u128(id),
            tenant_id: tenant(),
            name: format!("member-{}", id),
            status: MemberStatus::Active,
            is_available: true,
            specialties: vec!["Tax".to_string()],
        }
    }

    fn service_request(id: u128) -> ServiceRequest {
        ServiceRequest {
            id: Uuid::from_u128(id),
            tenant_id: tenant(),
            client_id: Uuid::from_u128(500),
            service_id: Uuid::from_u128(10),
            status: RequestStatus::Approved,
            assigned_team_member_id: None,
            assigned_at: None,
            assigned_by: None,
        }
    }

    // 2024-03-11 is a Monday; 13:00 UTC is outside the default peak hours
    fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, hour, minute, 0).unwrap()
    }

    fn booking_request(start: DateTime<Utc>) -> BookingRequest {
        BookingRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            scheduled_at: start,
            duration_minutes: None,
            team_member_id: None,
            service_request_id: None,
            options: PricingOptions::default(),
        }
    }

    struct Fixture {
        store: MemoryStore,
        audit: MemoryAuditLog,
        engine: SchedulingEngine,
    }

    async fn fixture(settings: TenantSettings) -> Fixture {
        let store = MemoryStore::new();
        store.insert_service(service()).await;
        let audit = MemoryAuditLog::new();

        let engine = SchedulingEngine::new(
            Collaborators {
                store: Arc::new(store.clone()),
                cache: Arc::new(MemoryCache::new()),
                settings: Arc::new(StaticSettings::new(settings)),
                promotions: Arc::new(NoPromotions),
                broadcaster: Arc::new(LogBroadcaster),
                audit: Arc::new(audit.clone()),
                metrics: PerformanceMetrics::new(),
            },
            EngineOptions::default(),
        );

        Fixture { store, audit, engine }
    }

    /// Engine over a store that never answers the `stalled` calls
    async fn stalled_fixture(stalled: &[&'static str]) -> Fixture {
        let store = MemoryStore::new();
        store.insert_service(service()).await;
        store.insert_member(member(100)).await;
        store.insert_request(service_request(1)).await;
        let slow = stalled
            .iter()
            .copied()
            .fold(SlowStore::new(store.clone()), |slow, operation| slow.stall(operation));
        let audit = MemoryAuditLog::new();

        let engine = SchedulingEngine::new(
            Collaborators {
                store: Arc::new(slow),
                cache: Arc::new(MemoryCache::new()),
                settings: Arc::new(StaticSettings::new(TenantSettings {
                    auto_assign: true,
                    ..TenantSettings::default()
                })),
                promotions: Arc::new(NoPromotions),
                broadcaster: Arc::new(LogBroadcaster),
                audit: Arc::new(audit.clone()),
                metrics: PerformanceMetrics::new(),
            },
            EngineOptions {
                call_timeout: CallTimeout::new(std::time::Duration::from_millis(20)),
                ..EngineOptions::default()
            },
        );

        Fixture { store, audit, engine }
    }

    fn assert_timeout<T: std::fmt::Debug>(result: SchedulingResult<T>, expected: &'static str) {
        match result {
            Err(SchedulingError::Timeout { operation }) => assert_eq!(operation, expected),
            other => panic!("expected {} to time out, got {:?}", expected, other),
        }
    }

    #[tokio::test]
    async fn test_stalled_reads_fail_with_timeout() {
        let f = stalled_fixture(&["find_service"]).await;

        let conflict = ConflictRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            start: monday(13, 0),
            duration_minutes: 60,
            exclude_booking_id: None,
            team_member_id: None,
        };
        assert_timeout(f.engine.check_conflict(&conflict).await, "find_service");

        let price = PriceRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            scheduled_at: monday(13, 0),
            duration_minutes: None,
            options: PricingOptions::default(),
        };
        assert_timeout(f.engine.calculate_price(&price).await, "find_service");

        let availability = AvailabilityRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            from: monday(0, 0),
            to: monday(23, 0),
            slot_minutes: None,
            team_member_id: None,
        };
        assert_timeout(f.engine.compute_availability(&availability).await, "find_service");
    }

    #[tokio::test]
    async fn test_stalled_booking_lookup_is_not_reported_as_free() {
        let f = stalled_fixture(&["list_blocking_bookings"]).await;

        let conflict = ConflictRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            start: monday(13, 0),
            duration_minutes: 60,
            exclude_booking_id: None,
            team_member_id: None,
        };
        assert_timeout(f.engine.check_conflict(&conflict).await, "list_blocking_bookings");
    }

    #[tokio::test]
    async fn test_stalled_rate_lookup_is_not_priced_at_par() {
        let f = stalled_fixture(&["latest_exchange_rate"]).await;

        let price = PriceRequest {
            tenant_id: Some(tenant()),
            service_id: Uuid::from_u128(10),
            scheduled_at: monday(13, 0),
            duration_minutes: None,
            options: PricingOptions {
                target_currency: Some("EUR".to_string()),
                ..PricingOptions::default()
            },
        };
        assert_timeout(f.engine.calculate_price(&price).await, "latest_exchange_rate");
    }

    #[tokio::test]
    async fn test_stalled_member_lookup_is_not_an_empty_pool() {
        let f = stalled_fixture(&["list_assignable_members"]).await;

        assert_timeout(
            f.engine.auto_assign(Some(tenant()), Uuid::from_u128(1)).await,
            "list_assignable_members",
        );
        let request = f.store.find_service_request(None, Uuid::from_u128(1)).await.unwrap();
        assert_eq!(request, Some(service_request(1)));
    }

    #[tokio::test]
    async fn test_stalled_commit_writes_nothing() {
        let f = stalled_fixture(&["commit_booking"]).await;

        assert_timeout(
            f.engine.create_booking(&booking_request(monday(13, 0))).await,
            "commit_booking",
        );
        assert!(f.store.bookings().await.is_empty());
        assert!(f.audit.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_booking_saves_quote_and_audits() {
        let f = fixture(TenantSettings::default()).await;

        let confirmation = f.engine.create_booking(&booking_request(monday(13, 0))).await.unwrap();

        assert_eq!(confirmation.booking.status, BookingStatus::Pending);
        assert_eq!(confirmation.booking.duration_minutes, 60);
        assert_eq!(confirmation.price.total_cents, 10000);
        assert!(confirmation.assignment.is_none());
        assert_eq!(f.store.bookings().await, vec![confirmation.booking.clone()]);

        let entries = f.audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "created");
        assert_eq!(entries[0].effect, "Booking created at 100.00 USD");
    }

    #[tokio::test]
    async fn test_create_booking_rejects_overlap() {
        let f = fixture(TenantSettings::default()).await;
        let first = f.engine.create_booking(&booking_request(monday(13, 0))).await.unwrap();

        let err = f
            .engine
            .create_booking(&booking_request(monday(13, 30)))
            .await
            .unwrap_err();

        match err {
            SchedulingError::Conflict {
                reason,
                conflicting_booking_id,
            } => {
                assert_eq!(reason, ConflictReason::Overlap);
                assert_eq!(conflicting_booking_id, Some(first.booking.id));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(f.store.bookings().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_booking_for_unknown_or_inactive_service() {
        let f = fixture(TenantSettings::default()).await;

        let unknown = BookingRequest {
            service_id: Uuid::from_u128(99),
            ..booking_request(monday(13, 0))
        };
        assert!(matches!(
            f.engine.create_booking(&unknown).await,
            Err(SchedulingError::NotFound { entity: "Service", .. })
        ));

        f.store
            .insert_service(Service {
                status: ServiceStatus::Inactive,
                ..service()
            })
            .await;
        assert!(matches!(
            f.engine.create_booking(&booking_request(monday(13, 0))).await,
            Err(SchedulingError::Conflict {
                reason: ConflictReason::ServiceInactive,
                ..
            })
        ));
        assert!(f.store.bookings().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_booking_rejects_free_quotes() {
        let f = fixture(TenantSettings::default()).await;
        f.store
            .insert_service(Service {
                base_price: dec!(0),
                ..service()
            })
            .await;

        let err = f
            .engine
            .create_booking(&booking_request(monday(13, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidState(_)));
        assert!(f.store.bookings().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_booking_auto_assigns_linked_request() {
        let f = fixture(TenantSettings {
            auto_assign: true,
            ..TenantSettings::default()
        })
        .await;
        f.store.insert_member(member(100)).await;
        f.store.insert_request(service_request(200)).await;

        let request = BookingRequest {
            service_request_id: Some(Uuid::from_u128(200)),
            ..booking_request(monday(13, 0))
        };
        let confirmation = f.engine.create_booking(&request).await.unwrap();

        let outcome = confirmation.assignment.unwrap();
        assert!(outcome.is_assigned());
        assert_eq!(outcome.request().assigned_team_member_id, Some(Uuid::from_u128(100)));
        assert_eq!(outcome.request().status, RequestStatus::Assigned);

        let actions: Vec<&str> = f.audit.entries().await.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["created", "auto_assigned"]);
    }

    #[tokio::test]
    async fn test_create_booking_with_unknown_linked_request() {
        let f = fixture(TenantSettings::default()).await;

        let request = BookingRequest {
            service_request_id: Some(Uuid::from_u128(404)),
            ..booking_request(monday(13, 0))
        };
        assert!(matches!(
            f.engine.create_booking(&request).await,
            Err(SchedulingError::NotFound { entity: "ServiceRequest", .. })
        ));
    }

    #[tokio::test]
    async fn test_reschedule_excludes_itself() {
        let f = fixture(TenantSettings::default()).await;
        let booking = f
            .engine
            .create_booking(&booking_request(monday(13, 0)))
            .await
            .unwrap()
            .booking;

        // Overlaps only its own previous window
        let moved = f
            .engine
            .reschedule_booking(Some(tenant()), booking.id, monday(13, 30), None)
            .await
            .unwrap();

        assert_eq!(moved.id, booking.id);
        assert_eq!(moved.scheduled_at, monday(13, 30));
        assert_eq!(f.store.bookings().await, vec![moved]);
    }

    #[tokio::test]
    async fn test_reschedule_onto_another_booking_conflicts() {
        let f = fixture(TenantSettings::default()).await;
        let first = f.engine.create_booking(&booking_request(monday(13, 0))).await.unwrap();
        let second = f.engine.create_booking(&booking_request(monday(15, 0))).await.unwrap();

        let err = f
            .engine
            .reschedule_booking(Some(tenant()), second.booking.id, monday(13, 30), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulingError::Conflict {
                reason: ConflictReason::Overlap,
                conflicting_booking_id: Some(id),
            } if id == first.booking.id
        ));
    }

    #[tokio::test]
    async fn test_reschedule_requires_blocking_status() {
        let f = fixture(TenantSettings::default()).await;
        let booking = f
            .engine
            .create_booking(&booking_request(monday(13, 0)))
            .await
            .unwrap()
            .booking;
        f.engine
            .transition_booking(Some(tenant()), booking.id, BookingStatus::Cancelled)
            .await
            .unwrap();

        let err = f
            .engine
            .reschedule_booking(Some(tenant()), booking.id, monday(16, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_transition_booking_follows_status_machine() {
        let f = fixture(TenantSettings::default()).await;
        let booking = f
            .engine
            .create_booking(&booking_request(monday(13, 0)))
            .await
            .unwrap()
            .booking;

        let confirmed = f
            .engine
            .transition_booking(Some(tenant()), booking.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);

        let err = f
            .engine
            .transition_booking(Some(tenant()), booking.id, BookingStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidTransition(_)));

        let again = f
            .engine
            .transition_booking(Some(tenant()), booking.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(again.status, BookingStatus::Confirmed);

        let actions: Vec<&str> = f.audit.entries().await.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["created", "status_changed"]);
    }

    #[tokio::test]
    async fn test_cancelled_booking_frees_the_window() {
        let f = fixture(TenantSettings::default()).await;
        let booking = f
            .engine
            .create_booking(&booking_request(monday(13, 0)))
            .await
            .unwrap()
            .booking;
        f.engine
            .transition_booking(Some(tenant()), booking.id, BookingStatus::Cancelled)
            .await
            .unwrap();

        let result = f
            .engine
            .check_conflict(&ConflictRequest {
                tenant_id: Some(tenant()),
                service_id: Uuid::from_u128(10),
                start: monday(13, 0),
                duration_minutes: 60,
                exclude_booking_id: None,
                team_member_id: None,
            })
            .await
            .unwrap();
        assert_eq!(result, ConflictResult::clear());
    }

    #[tokio::test]
    async fn test_booked_slot_becomes_unavailable() {
        let f = fixture(TenantSettings::default()).await;
        f.engine.create_booking(&booking_request(monday(13, 0))).await.unwrap();

        let slots = f
            .engine
            .compute_availability(&AvailabilityRequest {
                tenant_id: Some(tenant()),
                service_id: Uuid::from_u128(10),
                from: monday(0, 0),
                to: monday(0, 0) + Duration::days(1),
                slot_minutes: None,
                team_member_id: None,
            })
            .await
            .unwrap();

        let taken: Vec<DateTime<Utc>> = slots.iter().filter(|s| !s.available).map(|s| s.start).collect();
        assert_eq!(taken, vec![monday(13, 0)]);
        assert_eq!(slots.len(), 8);
    }

    #[tokio::test]
    async fn test_reassign_request_is_audited() {
        let f = fixture(TenantSettings::default()).await;
        f.store.insert_member(member(100)).await;
        f.store.insert_request(service_request(200)).await;

        let request = f
            .engine
            .reassign_request(Some(tenant()), Uuid::from_u128(200), Uuid::from_u128(100), Some(Uuid::from_u128(7)))
            .await
            .unwrap();

        assert_eq!(request.assigned_team_member_id, Some(Uuid::from_u128(100)));
        let entries = f.audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity, "service_request");
        assert_eq!(entries[0].action, "reassigned");
    }

    #[tokio::test]
    async fn test_warm_cache_and_metrics() {
        let f = fixture(TenantSettings::default()).await;
        assert_eq!(f.engine.warm_cache(&[tenant(), Uuid::from_u128(2)]).await, 2);

        f.engine
            .calculate_price(&PriceRequest {
                tenant_id: Some(tenant()),
                service_id: Uuid::from_u128(10),
                scheduled_at: monday(13, 0),
                duration_minutes: None,
                options: PricingOptions::default(),
            })
            .await
            .unwrap();
        assert_eq!(f.engine.metrics().summary().pricing.count, 1);
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(11500), "115.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
