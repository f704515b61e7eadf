// Auto-Assignment Engine
//
// Routes an unassigned service request to an active, available team member
// using the tenant's strategy (load-based, skill-based or round-robin).
// The write is a compare-and-swap on the assignee, so concurrent runs for the
// same request assign it at most once. Round-robin position lives in the
// key-value cache and is eventually consistent.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{MemberStatus, RequestStatus, ServiceRequest, TeamMember};
use crate::scheduling::deadline::CallTimeout;
use crate::scheduling::error::{SchedulingError, SchedulingResult};
use crate::scheduling::metrics::{OperationType, PerformanceMetrics};
use crate::scheduling::notify::{AssignmentEvent, Broadcaster};
use crate::scheduling::settings::SettingsProvider;
use crate::scheduling::types::AssignmentStrategy;
use crate::status_machine::StatusMachine;
use crate::store::{KeyValueCache, RequestAssignment, SchedulingStore};

/// Lifetime of the cached round-robin position
pub const ROTATION_TTL: Duration = Duration::from_secs(3600);

/// Cache key holding the last member picked by round-robin for a tenant
pub fn rotation_key(tenant_id: Uuid) -> String {
    format!("rotation:{}", tenant_id)
}

/// A member of the candidate pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: Uuid,
    /// Requests currently assigned or in progress
    pub workload: i64,
    pub skill_match: bool,
}

/// Least workload, ties to the smallest id
pub fn pick_load_based(candidates: &[Candidate]) -> Option<Uuid> {
    candidates
        .iter()
        .min_by_key(|c| (c.workload, c.id))
        .map(|c| c.id)
}

/// Load-based among skill matches, or over the whole pool when none match
pub fn pick_skill_based(candidates: &[Candidate]) -> Option<Uuid> {
    let matching: Vec<Candidate> = candidates.iter().filter(|c| c.skill_match).cloned().collect();
    if matching.is_empty() {
        pick_load_based(candidates)
    } else {
        pick_load_based(&matching)
    }
}

/// Next id after `last` in ascending order, wrapping; the first id when `last`
/// is unknown or no longer in the pool
pub fn pick_round_robin(candidates: &[Candidate], last: Option<Uuid>) -> Option<Uuid> {
    let mut ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
    ids.sort();

    let next = last
        .and_then(|last| ids.iter().position(|id| *id == last))
        .map_or(0, |index| (index + 1) % ids.len());
    ids.get(next).copied()
}

/// Apply `strategy` to the candidate pool
pub fn select(strategy: AssignmentStrategy, candidates: &[Candidate], last: Option<Uuid>) -> Option<Uuid> {
    match strategy {
        AssignmentStrategy::LoadBased => pick_load_based(candidates),
        AssignmentStrategy::SkillBased => pick_skill_based(candidates),
        AssignmentStrategy::RoundRobin => pick_round_robin(candidates, last),
    }
}

/// Why auto-assignment left a request as it was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedReason {
    AlreadyAssigned,
    RequestClosed,
    AutoAssignDisabled,
    NoCandidates,
    /// Another writer assigned the request first
    LostRace,
}

/// Result of an auto-assignment attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned {
        request: ServiceRequest,
        strategy: AssignmentStrategy,
    },
    Unchanged {
        request: ServiceRequest,
        reason: UnchangedReason,
    },
}

impl AssignmentOutcome {
    pub fn request(&self) -> &ServiceRequest {
        match self {
            AssignmentOutcome::Assigned { request, .. } => request,
            AssignmentOutcome::Unchanged { request, .. } => request,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, AssignmentOutcome::Assigned { .. })
    }
}

/// Auto-Assignment Engine
pub struct AssignmentEngine {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn KeyValueCache>,
    settings: Arc<dyn SettingsProvider>,
    broadcaster: Arc<dyn Broadcaster>,
    /// Restrict the candidate pool to the request's tenant
    multi_tenant: bool,
    timeout: CallTimeout,
    metrics: PerformanceMetrics,
}

impl AssignmentEngine {
    /// Create a new AssignmentEngine; the candidate pool is tenant-scoped by default
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        cache: Arc<dyn KeyValueCache>,
        settings: Arc<dyn SettingsProvider>,
        broadcaster: Arc<dyn Broadcaster>,
        timeout: CallTimeout,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            settings,
            broadcaster,
            multi_tenant: true,
            timeout,
            metrics,
        }
    }

    /// Allow candidates from every tenant when `multi_tenant` is false
    pub fn with_multi_tenant(mut self, multi_tenant: bool) -> Self {
        self.multi_tenant = multi_tenant;
        self
    }

    async fn load_request(&self, tenant_id: Option<Uuid>, request_id: Uuid) -> SchedulingResult<ServiceRequest> {
        self.timeout
            .run("find_service_request", self.store.find_service_request(tenant_id, request_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("ServiceRequest", request_id))
    }

    /// Assign an unassigned request using the tenant's strategy
    ///
    /// Every no-op returns the request untouched together with the reason.
    pub async fn auto_assign(&self, tenant_id: Option<Uuid>, request_id: Uuid) -> SchedulingResult<AssignmentOutcome> {
        let _timer = self.metrics.start(OperationType::Assignment);

        let request = self.load_request(tenant_id, request_id).await?;
        let unchanged = |request: ServiceRequest, reason| Ok(AssignmentOutcome::Unchanged { request, reason });

        if request.is_assigned() {
            return unchanged(request, UnchangedReason::AlreadyAssigned);
        }
        if request.status.is_terminal() {
            return unchanged(request, UnchangedReason::RequestClosed);
        }

        let settings = self.settings.tenant_settings(Some(request.tenant_id)).await?;
        if !settings.auto_assign {
            tracing::debug!("Auto-assign disabled for tenant {}", request.tenant_id);
            return unchanged(request, UnchangedReason::AutoAssignDisabled);
        }

        let pool_scope = self.multi_tenant.then_some(request.tenant_id);
        let members: Vec<TeamMember> = self
            .timeout
            .run("list_assignable_members", self.store.list_assignable_members(pool_scope))
            .await?
            .into_iter()
            .filter(TeamMember::is_assignable)
            .collect();

        if members.is_empty() {
            tracing::warn!("No assignable team members for request {}", request.id);
            return unchanged(request, UnchangedReason::NoCandidates);
        }

        let strategy = settings.auto_assign_strategy;
        let candidates = self.candidates(&request, &members, pool_scope, strategy).await?;

        let last = match strategy {
            AssignmentStrategy::RoundRobin => self.last_rotation(request.tenant_id).await,
            _ => None,
        };
        let Some(member_id) = select(strategy, &candidates, last) else {
            return unchanged(request, UnchangedReason::NoCandidates);
        };

        // Requests already past the target status keep theirs
        let status = StatusMachine::transition_request(request.status, settings.default_request_status)
            .unwrap_or(request.status);
        let assignment = RequestAssignment {
            tenant_id,
            request_id: request.id,
            team_member_id: member_id,
            status,
            assigned_at: Utc::now(),
            assigned_by: None,
            only_if_unassigned: true,
        };
        let updated = self
            .timeout
            .run("assign_request", self.store.assign_request(&assignment))
            .await?;

        let Some(updated) = updated else {
            tracing::info!("Request {} was assigned concurrently; leaving it", request.id);
            let current = self.load_request(tenant_id, request.id).await?;
            return unchanged(current, UnchangedReason::LostRace);
        };

        if strategy == AssignmentStrategy::RoundRobin {
            self.store_rotation(updated.tenant_id, member_id).await;
        }

        tracing::info!(
            "Auto-assigned request {} to {} using {}",
            updated.id,
            member_id,
            strategy
        );
        self.announce(&updated, Some(strategy));

        Ok(AssignmentOutcome::Assigned {
            request: updated,
            strategy,
        })
    }

    /// Explicitly (re)assign a request to `member_id`
    ///
    /// The member must be active. Closed requests cannot be reassigned; a
    /// request that had not reached ASSIGNED moves there.
    pub async fn reassign_request(
        &self,
        tenant_id: Option<Uuid>,
        request_id: Uuid,
        member_id: Uuid,
        assigned_by: Option<Uuid>,
    ) -> SchedulingResult<ServiceRequest> {
        let _timer = self.metrics.start(OperationType::Assignment);

        let request = self.load_request(tenant_id, request_id).await?;
        if request.status.is_terminal() {
            return Err(SchedulingError::InvalidState(format!(
                "Cannot reassign a {} request",
                request.status
            )));
        }

        let member_scope = self.multi_tenant.then_some(request.tenant_id);
        let member = self
            .timeout
            .run("find_team_member", self.store.find_team_member(member_scope, member_id))
            .await?
            .ok_or_else(|| SchedulingError::not_found("TeamMember", member_id))?;
        if member.status != MemberStatus::Active {
            return Err(SchedulingError::InvalidState(format!(
                "Team member {} is not active",
                member.id
            )));
        }

        let status = match (request.status.rank(), RequestStatus::Assigned.rank()) {
            (Some(current), Some(assigned)) if current < assigned => RequestStatus::Assigned,
            _ => request.status,
        };
        StatusMachine::transition_request(request.status, status)
            .map_err(SchedulingError::InvalidTransition)?;

        let assignment = RequestAssignment {
            tenant_id,
            request_id,
            team_member_id: member.id,
            status,
            assigned_at: Utc::now(),
            assigned_by,
            only_if_unassigned: false,
        };
        let updated = self
            .timeout
            .run("assign_request", self.store.assign_request(&assignment))
            .await?
            .ok_or_else(|| SchedulingError::not_found("ServiceRequest", request_id))?;

        tracing::info!("Reassigned request {} to {}", updated.id, member.id);
        self.announce(&updated, None);
        Ok(updated)
    }

    async fn candidates(
        &self,
        request: &ServiceRequest,
        members: &[TeamMember],
        pool_scope: Option<Uuid>,
        strategy: AssignmentStrategy,
    ) -> SchedulingResult<Vec<Candidate>> {
        let category = if strategy == AssignmentStrategy::SkillBased {
            self.timeout
                .run("find_service", self.store.find_service(Some(request.tenant_id), request.service_id))
                .await?
                .and_then(|service| service.category)
        } else {
            None
        };

        let ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
        let workloads = self
            .timeout
            .run("active_workloads", self.store.active_workloads(pool_scope, &ids))
            .await?;

        Ok(members
            .iter()
            .map(|member| Candidate {
                id: member.id,
                workload: workloads.get(&member.id).copied().unwrap_or(0),
                skill_match: category
                    .as_deref()
                    .map_or(false, |category| member.has_specialty(category)),
            })
            .collect())
    }

    /// Last round-robin pick; unreadable state counts as none
    async fn last_rotation(&self, tenant_id: Uuid) -> Option<Uuid> {
        let key = rotation_key(tenant_id);
        match self.timeout.run("cache_get", self.cache.get(&key)).await {
            Ok(Some(value)) => match Uuid::parse_str(&value) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!("Ignoring malformed rotation state '{}' for tenant {}", value, tenant_id);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Rotation state unavailable for tenant {}: {}", tenant_id, e);
                None
            }
        }
    }

    async fn store_rotation(&self, tenant_id: Uuid, member_id: Uuid) {
        let key = rotation_key(tenant_id);
        let value = member_id.to_string();
        if let Err(e) = self
            .timeout
            .run("cache_set", self.cache.set(&key, &value, ROTATION_TTL))
            .await
        {
            tracing::warn!("Failed to store rotation state for tenant {}: {}", tenant_id, e);
        }
    }

    /// Fire-and-forget broadcast of the assignment
    fn announce(&self, request: &ServiceRequest, strategy: Option<AssignmentStrategy>) {
        let Some(team_member_id) = request.assigned_team_member_id else {
            return;
        };
        let event = AssignmentEvent {
            tenant_id: request.tenant_id,
            service_request_id: request.id,
            team_member_id,
            status: request.status,
            assigned_at: request.assigned_at.unwrap_or_else(Utc::now),
            assigned_by: request.assigned_by,
            strategy,
        };

        let broadcaster = Arc::clone(&self.broadcaster);
        tokio::spawn(async move {
            broadcaster.publish(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemberStatus, Service, ServiceStatus};
    use crate::scheduling::notify::{ChannelBroadcaster, LogBroadcaster};
    use crate::scheduling::settings::{StaticSettings, TenantSettings};
    use crate::store::{MemoryCache, MemoryStore};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn tenant() -> Uuid {
        Uuid::from_u128(1)
    }

    fn member(id: u128, specialties: &[&str]) -> TeamMember {
        TeamMember {
            id: Uuid::from_u128(id),
            tenant_id: tenant(),
            name: format!("member-{}", id),
            status: MemberStatus::Active,
            is_available: true,
            specialties: specialties.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn request(id: u128) -> ServiceRequest {
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

    fn assigned_to(id: u128, member: u128) -> ServiceRequest {
        ServiceRequest {
            status: RequestStatus::InProgress,
            assigned_team_member_id: Some(Uuid::from_u128(member)),
            ..request(id)
        }
    }

    fn service(category: &str) -> Service {
        Service {
            id: Uuid::from_u128(10),
            tenant_id: tenant(),
            name: "Filing".to_string(),
            category: Some(category.to_string()),
            status: ServiceStatus::Active,
            base_price: dec!(100.00),
            standard_duration_minutes: 60,
            buffer_time_minutes: 0,
            max_daily_bookings: 0,
            booking_enabled: true,
            calendar: None,
        }
    }

    fn settings(strategy: AssignmentStrategy) -> TenantSettings {
        TenantSettings {
            auto_assign: true,
            auto_assign_strategy: strategy,
            ..TenantSettings::default()
        }
    }

    fn engine(store: &MemoryStore, cache: &MemoryCache, settings: TenantSettings) -> AssignmentEngine {
        AssignmentEngine::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            Arc::new(StaticSettings::new(settings)),
            Arc::new(LogBroadcaster),
            CallTimeout::default(),
            PerformanceMetrics::new(),
        )
    }

    fn candidate(id: u128, workload: i64, skill_match: bool) -> Candidate {
        Candidate {
            id: Uuid::from_u128(id),
            workload,
            skill_match,
        }
    }

    #[test]
    fn test_load_based_prefers_least_loaded_then_smallest_id() {
        let pool = vec![candidate(3, 1, false), candidate(2, 1, false), candidate(1, 4, false)];
        assert_eq!(pick_load_based(&pool), Some(Uuid::from_u128(2)));
        assert_eq!(pick_load_based(&[]), None);
    }

    #[test]
    fn test_skill_based_falls_back_to_whole_pool() {
        let pool = vec![candidate(1, 0, false), candidate(2, 5, false)];
        assert_eq!(pick_skill_based(&pool), Some(Uuid::from_u128(1)));

        let pool = vec![candidate(1, 0, false), candidate(2, 5, true)];
        assert_eq!(pick_skill_based(&pool), Some(Uuid::from_u128(2)));
    }

    #[test]
    fn test_round_robin_wraps_and_restarts_on_stale_state() {
        let pool = vec![candidate(3, 0, false), candidate(1, 0, false), candidate(2, 0, false)];
        assert_eq!(pick_round_robin(&pool, None), Some(Uuid::from_u128(1)));
        assert_eq!(pick_round_robin(&pool, Some(Uuid::from_u128(1))), Some(Uuid::from_u128(2)));
        assert_eq!(pick_round_robin(&pool, Some(Uuid::from_u128(3))), Some(Uuid::from_u128(1)));
        assert_eq!(pick_round_robin(&pool, Some(Uuid::from_u128(99))), Some(Uuid::from_u128(1)));
    }

    #[tokio::test]
    async fn test_skill_based_scenario() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_service(service("Tax")).await;
        store.insert_member(member(1, &["Audit"])).await;
        store.insert_member(member(2, &["Tax"])).await;
        store.insert_request(assigned_to(101, 1)).await;
        for id in 201..204 {
            store.insert_request(assigned_to(id, 2)).await;
        }
        store.insert_request(request(1)).await;

        let outcome = engine(&store, &cache, settings(AssignmentStrategy::SkillBased))
            .auto_assign(Some(tenant()), Uuid::from_u128(1))
            .await
            .unwrap();

        assert!(outcome.is_assigned());
        let updated = outcome.request();
        assert_eq!(updated.assigned_team_member_id, Some(Uuid::from_u128(2)));
        assert_eq!(updated.status, RequestStatus::Assigned);
        assert_eq!(updated.assigned_by, None);
        assert!(updated.assigned_at.is_some());
    }

    #[tokio::test]
    async fn test_load_based_assignment_uses_configured_status() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_member(member(1, &[])).await;
        store.insert_member(member(2, &[])).await;
        store.insert_request(assigned_to(101, 1)).await;
        store.insert_request(request(1)).await;

        let settings = TenantSettings {
            default_request_status: RequestStatus::InProgress,
            ..settings(AssignmentStrategy::LoadBased)
        };
        let outcome = engine(&store, &cache, settings)
            .auto_assign(Some(tenant()), Uuid::from_u128(1))
            .await
            .unwrap();

        assert_eq!(outcome.request().assigned_team_member_id, Some(Uuid::from_u128(2)));
        assert_eq!(outcome.request().status, RequestStatus::InProgress);
    }

    #[tokio::test]
    async fn test_assignment_never_moves_status_backwards() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_member(member(1, &[])).await;
        store
            .insert_request(ServiceRequest {
                status: RequestStatus::InProgress,
                ..request(1)
            })
            .await;

        let outcome = engine(&store, &cache, settings(AssignmentStrategy::LoadBased))
            .auto_assign(Some(tenant()), Uuid::from_u128(1))
            .await
            .unwrap();

        assert!(outcome.is_assigned());
        assert_eq!(outcome.request().assigned_team_member_id, Some(Uuid::from_u128(1)));
        assert_eq!(outcome.request().status, RequestStatus::InProgress);
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_member_once() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        for id in 1..=3 {
            store.insert_member(member(id, &[])).await;
        }
        for id in 11..=13 {
            store.insert_request(request(id)).await;
        }
        let engine = engine(&store, &cache, settings(AssignmentStrategy::RoundRobin));

        let mut picked = Vec::new();
        for id in 11..=13 {
            let outcome = engine.auto_assign(Some(tenant()), Uuid::from_u128(id)).await.unwrap();
            picked.push(outcome.request().assigned_team_member_id.unwrap());
        }

        assert_eq!(
            picked,
            vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
        );
        assert_eq!(
            cache.get(&rotation_key(tenant())).await.unwrap(),
            Some(Uuid::from_u128(3).to_string())
        );
    }

    #[tokio::test]
    async fn test_no_ops() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_request(request(1)).await;
        store.insert_request(assigned_to(2, 7)).await;

        // Disabled
        let outcome = engine(&store, &cache, TenantSettings::default())
            .auto_assign(Some(tenant()), Uuid::from_u128(1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AssignmentOutcome::Unchanged { reason: UnchangedReason::AutoAssignDisabled, .. }
        ));

        let engine = engine(&store, &cache, settings(AssignmentStrategy::LoadBased));

        // Already assigned
        let outcome = engine.auto_assign(Some(tenant()), Uuid::from_u128(2)).await.unwrap();
        assert!(matches!(
            outcome,
            AssignmentOutcome::Unchanged { reason: UnchangedReason::AlreadyAssigned, .. }
        ));

        // Empty pool
        let outcome = engine.auto_assign(Some(tenant()), Uuid::from_u128(1)).await.unwrap();
        assert!(matches!(
            outcome,
            AssignmentOutcome::Unchanged { reason: UnchangedReason::NoCandidates, .. }
        ));
        assert_eq!(outcome.request(), &request(1));

        // Unavailable members are not candidates
        store
            .insert_member(TeamMember {
                is_available: false,
                ..member(3, &[])
            })
            .await;
        let outcome = engine.auto_assign(Some(tenant()), Uuid::from_u128(1)).await.unwrap();
        assert!(!outcome.is_assigned());

        let missing = engine.auto_assign(Some(tenant()), Uuid::from_u128(404)).await;
        assert!(matches!(missing, Err(SchedulingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_pool_is_tenant_scoped() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store
            .insert_member(TeamMember {
                tenant_id: Uuid::from_u128(2),
                ..member(1, &[])
            })
            .await;
        store.insert_request(request(1)).await;

        let scoped = engine(&store, &cache, settings(AssignmentStrategy::LoadBased));
        let outcome = scoped.auto_assign(Some(tenant()), Uuid::from_u128(1)).await.unwrap();
        assert!(!outcome.is_assigned());

        let shared = engine(&store, &cache, settings(AssignmentStrategy::LoadBased)).with_multi_tenant(false);
        let outcome = shared.auto_assign(Some(tenant()), Uuid::from_u128(1)).await.unwrap();
        assert!(outcome.is_assigned());
    }

    #[tokio::test]
    async fn test_concurrent_runs_assign_once() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_member(member(1, &[])).await;
        store.insert_member(member(2, &[])).await;
        store.insert_request(request(1)).await;
        let engine = engine(&store, &cache, settings(AssignmentStrategy::LoadBased));

        let (first, second) = tokio::join!(
            engine.auto_assign(Some(tenant()), Uuid::from_u128(1)),
            engine.auto_assign(Some(tenant()), Uuid::from_u128(1)),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        let assigned = [&first, &second].iter().filter(|o| o.is_assigned()).count();
        assert_eq!(assigned, 1);
        assert_eq!(
            first.request().assigned_team_member_id,
            second.request().assigned_team_member_id
        );
        assert!(first.request().assigned_team_member_id.is_some());
    }

    #[tokio::test]
    async fn test_assignment_is_broadcast() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_member(member(1, &[])).await;
        store.insert_request(request(1)).await;

        let broadcaster = ChannelBroadcaster::new(4);
        let mut events = broadcaster.subscribe();
        let engine = AssignmentEngine::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            Arc::new(StaticSettings::new(settings(AssignmentStrategy::LoadBased))),
            Arc::new(broadcaster),
            CallTimeout::default(),
            PerformanceMetrics::new(),
        );

        engine.auto_assign(Some(tenant()), Uuid::from_u128(1)).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.team_member_id, Uuid::from_u128(1));
        assert_eq!(event.strategy, Some(AssignmentStrategy::LoadBased));
    }

    #[tokio::test]
    async fn test_reassign_request() {
        let store = MemoryStore::new();
        let cache = MemoryCache::new();
        store.insert_member(member(1, &[])).await;
        store
            .insert_member(TeamMember {
                status: MemberStatus::Inactive,
                ..member(2, &[])
            })
            .await;
        store.insert_request(request(1)).await;
        store.insert_request(assigned_to(2, 9)).await;
        store
            .insert_request(ServiceRequest {
                status: RequestStatus::Completed,
                ..request(3)
            })
            .await;

        let engine = engine(&store, &cache, TenantSettings::default());
        let admin = Some(Uuid::from_u128(900));

        let updated = engine
            .reassign_request(Some(tenant()), Uuid::from_u128(1), Uuid::from_u128(1), admin)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Assigned);
        assert_eq!(updated.assigned_by, admin);

        // In-progress requests keep their status
        let updated = engine
            .reassign_request(Some(tenant()), Uuid::from_u128(2), Uuid::from_u128(1), admin)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::InProgress);
        assert_eq!(updated.assigned_team_member_id, Some(Uuid::from_u128(1)));

        let inactive = engine
            .reassign_request(Some(tenant()), Uuid::from_u128(1), Uuid::from_u128(2), admin)
            .await;
        assert!(matches!(inactive, Err(SchedulingError::InvalidState(_))));

        let closed = engine
            .reassign_request(Some(tenant()), Uuid::from_u128(3), Uuid::from_u128(1), admin)
            .await;
        assert!(matches!(closed, Err(SchedulingError::InvalidState(_))));
    }

    proptest! {
        #[test]
        fn prop_round_robin_cycles_through_pool(size in 1usize..12, seed in 0u128..1000) {
            let pool: Vec<Candidate> = (0..size as u128)
                .map(|i| candidate(seed * 100 + i * 7 + 1, 0, false))
                .collect();

            let mut seen = Vec::new();
            let mut last = None;
            for _ in 0..size {
                let next = pick_round_robin(&pool, last).unwrap();
                seen.push(next);
                last = Some(next);
            }

            let mut expected: Vec<Uuid> = pool.iter().map(|c| c.id).collect();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn prop_load_based_choice_is_minimal(loads in proptest::collection::vec(0i64..10, 1..15)) {
            let pool: Vec<Candidate> = loads
                .iter()
                .enumerate()
                .map(|(i, load)| candidate(i as u128 + 1, *load, false))
                .collect();

            let chosen = pick_load_based(&pool).unwrap();
            let chosen = pool.iter().find(|c| c.id == chosen).unwrap();
            let min = pool.iter().map(|c| c.workload).min().unwrap();

            prop_assert_eq!(chosen.workload, min);
            prop_assert!(pool
                .iter()
                .filter(|c| c.workload == min)
                .all(|c| c.id >= chosen.id));
        }
    }
}
