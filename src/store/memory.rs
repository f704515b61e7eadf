// In-memory record store
//
// Used when the service runs with `STORE_BACKEND=memory` and by the test suite.
// A single write lock around the commit guard gives the same serialisation the
// PostgreSQL store gets from locking the service row.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    in_tenant_scope, BookingCommit, BookingQuery, BookingWrite, CommitGuard, GuardSnapshot,
    RequestAssignment, SchedulingStore, StoreError, StoreResult,
};
use crate::models::{
    Booking, BookingStatus, ExchangeRate, RequestStatus, Service, ServiceRequest, TeamMember,
};

#[derive(Debug, Default)]
struct MemoryData {
    services: HashMap<Uuid, Service>,
    bookings: HashMap<Uuid, Booking>,
    requests: HashMap<Uuid, ServiceRequest>,
    members: HashMap<Uuid, TeamMember>,
    exchange_rates: Vec<ExchangeRate>,
    settings: HashMap<Uuid, serde_json::Value>,
}

impl MemoryData {
    fn snapshot(&self, write: &BookingWrite) -> GuardSnapshot {
        let service = self
            .services
            .get(&write.booking.service_id)
            .filter(|s| in_tenant_scope(write.overlap_scope.tenant_id, s.tenant_id))
            .cloned();

        let mut overlapping: Vec<Booking> = self
            .bookings
            .values()
            .filter(|b| write.overlap_scope.matches(b))
            .cloned()
            .collect();
        overlapping.sort_by_key(|b| (b.scheduled_at, b.id));

        let same_day_count = write.day_scope.as_ref().map_or(0, |scope| {
            self.bookings.values().filter(|b| scope.matches(b)).count() as i64
        });

        GuardSnapshot {
            service,
            overlapping,
            same_day_count,
        }
    }
}

/// Thread-safe in-process implementation of [`SchedulingStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service(&self, service: Service) {
        self.data.write().await.services.insert(service.id, service);
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.data.write().await.bookings.insert(booking.id, booking);
    }

    pub async fn insert_request(&self, request: ServiceRequest) {
        self.data.write().await.requests.insert(request.id, request);
    }

    pub async fn insert_member(&self, member: TeamMember) {
        self.data.write().await.members.insert(member.id, member);
    }

    pub async fn insert_exchange_rate(&self, rate: ExchangeRate) {
        self.data.write().await.exchange_rates.push(rate);
    }

    pub async fn insert_tenant_settings(&self, tenant_id: Uuid, settings: serde_json::Value) {
        self.data.write().await.settings.insert(tenant_id, settings);
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.data.read().await.bookings.values().cloned().collect()
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn find_service(
        &self,
        tenant_id: Option<Uuid>,
        service_id: Uuid,
    ) -> StoreResult<Option<Service>> {
        let data = self.data.read().await;
        Ok(data
            .services
            .get(&service_id)
            .filter(|s| in_tenant_scope(tenant_id, s.tenant_id))
            .cloned())
    }

    async fn list_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<Vec<Booking>> {
        let data = self.data.read().await;
        let mut bookings: Vec<Booking> = data
            .bookings
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.scheduled_at, b.id));
        Ok(bookings)
    }

    async fn count_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<i64> {
        let data = self.data.read().await;
        Ok(data.bookings.values().filter(|b| query.matches(b)).count() as i64)
    }

    async fn find_booking(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
    ) -> StoreResult<Option<Booking>> {
        let data = self.data.read().await;
        Ok(data
            .bookings
            .get(&booking_id)
            .filter(|b| in_tenant_scope(tenant_id, b.tenant_id))
            .cloned())
    }

    async fn commit_booking(
        &self,
        write: &BookingWrite,
        guard: &CommitGuard,
    ) -> StoreResult<BookingCommit> {
        let mut data = self.data.write().await;

        let verdict = guard(&data.snapshot(write));
        if verdict.conflict {
            return Ok(BookingCommit::Rejected(verdict));
        }

        data.bookings.insert(write.booking.id, write.booking.clone());
        Ok(BookingCommit::Saved(write.booking.clone()))
    }

    async fn update_booking_status(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let mut data = self.data.write().await;
        let Some(booking) = data
            .bookings
            .get_mut(&booking_id)
            .filter(|b| in_tenant_scope(tenant_id, b.tenant_id) && b.status == from)
        else {
            return Ok(None);
        };

        booking.status = to;
        Ok(Some(booking.clone()))
    }

    async fn find_service_request(
        &self,
        tenant_id: Option<Uuid>,
        request_id: Uuid,
    ) -> StoreResult<Option<ServiceRequest>> {
        let data = self.data.read().await;
        Ok(data
            .requests
            .get(&request_id)
            .filter(|r| in_tenant_scope(tenant_id, r.tenant_id))
            .cloned())
    }

    async fn find_team_member(
        &self,
        tenant_id: Option<Uuid>,
        member_id: Uuid,
    ) -> StoreResult<Option<TeamMember>> {
        let data = self.data.read().await;
        Ok(data
            .members
            .get(&member_id)
            .filter(|m| in_tenant_scope(tenant_id, m.tenant_id))
            .cloned())
    }

    async fn list_assignable_members(
        &self,
        tenant_id: Option<Uuid>,
    ) -> StoreResult<Vec<TeamMember>> {
        let data = self.data.read().await;
        let mut members: Vec<TeamMember> = data
            .members
            .values()
            .filter(|m| in_tenant_scope(tenant_id, m.tenant_id) && m.is_assignable())
            .cloned()
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    async fn active_workloads(
        &self,
        tenant_id: Option<Uuid>,
        member_ids: &[Uuid],
    ) -> StoreResult<HashMap<Uuid, i64>> {
        let data = self.data.read().await;
        let mut workloads = HashMap::new();

        for request in data.requests.values() {
            if !in_tenant_scope(tenant_id, request.tenant_id)
                || !RequestStatus::ACTIVE_WORKLOAD.contains(&request.status)
            {
                continue;
            }
            if let Some(member) = request.assigned_team_member_id {
                if member_ids.contains(&member) {
                    *workloads.entry(member).or_insert(0) += 1;
                }
            }
        }

        Ok(workloads)
    }

    async fn assign_request(
        &self,
        assignment: &RequestAssignment,
    ) -> StoreResult<Option<ServiceRequest>> {
        let mut data = self.data.write().await;
        let Some(request) = data
            .requests
            .get_mut(&assignment.request_id)
            .filter(|r| in_tenant_scope(assignment.tenant_id, r.tenant_id))
        else {
            return Ok(None);
        };

        if assignment.only_if_unassigned && request.is_assigned() {
            return Ok(None);
        }

        request.assigned_team_member_id = Some(assignment.team_member_id);
        request.assigned_at = Some(assignment.assigned_at);
        request.assigned_by = assignment.assigned_by;
        request.status = assignment.status;
        Ok(Some(request.clone()))
    }

    async fn latest_exchange_rate(
        &self,
        base: &str,
        target: &str,
    ) -> StoreResult<Option<ExchangeRate>> {
        let data = self.data.read().await;
        Ok(data
            .exchange_rates
            .iter()
            .filter(|r| r.base.eq_ignore_ascii_case(base) && r.target.eq_ignore_ascii_case(target))
            .max_by_key(|r| r.fetched_at)
            .cloned())
    }

    async fn tenant_settings(&self, tenant_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.data.read().await.settings.get(&tenant_id).cloned())
    }
}

/// Store that fails every call, for exercising upstream-failure propagation
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

#[async_trait]
impl SchedulingStore for UnavailableStore {
    async fn find_service(&self, _: Option<Uuid>, _: Uuid) -> StoreResult<Option<Service>> {
        Err(StoreError::Unavailable("find_service".to_string()))
    }

    async fn list_blocking_bookings(&self, _: &BookingQuery) -> StoreResult<Vec<Booking>> {
        Err(StoreError::Unavailable("list_blocking_bookings".to_string()))
    }

    async fn count_blocking_bookings(&self, _: &BookingQuery) -> StoreResult<i64> {
        Err(StoreError::Unavailable("count_blocking_bookings".to_string()))
    }

    async fn find_booking(&self, _: Option<Uuid>, _: Uuid) -> StoreResult<Option<Booking>> {
        Err(StoreError::Unavailable("find_booking".to_string()))
    }

    async fn commit_booking(&self, _: &BookingWrite, _: &CommitGuard) -> StoreResult<BookingCommit> {
        Err(StoreError::Unavailable("commit_booking".to_string()))
    }

    async fn update_booking_status(
        &self,
        _: Option<Uuid>,
        _: Uuid,
        _: BookingStatus,
        _: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        Err(StoreError::Unavailable("update_booking_status".to_string()))
    }

    async fn find_service_request(&self, _: Option<Uuid>, _: Uuid) -> StoreResult<Option<ServiceRequest>> {
        Err(StoreError::Unavailable("find_service_request".to_string()))
    }

    async fn find_team_member(&self, _: Option<Uuid>, _: Uuid) -> StoreResult<Option<TeamMember>> {
        Err(StoreError::Unavailable("find_team_member".to_string()))
    }

    async fn list_assignable_members(&self, _: Option<Uuid>) -> StoreResult<Vec<TeamMember>> {
        Err(StoreError::Unavailable("list_assignable_members".to_string()))
    }

    async fn active_workloads(&self, _: Option<Uuid>, _: &[Uuid]) -> StoreResult<HashMap<Uuid, i64>> {
        Err(StoreError::Unavailable("active_workloads".to_string()))
    }

    async fn assign_request(&self, _: &RequestAssignment) -> StoreResult<Option<ServiceRequest>> {
        Err(StoreError::Unavailable("assign_request".to_string()))
    }

    async fn latest_exchange_rate(&self, _: &str, _: &str) -> StoreResult<Option<ExchangeRate>> {
        Err(StoreError::Unavailable("latest_exchange_rate".to_string()))
    }

    async fn tenant_settings(&self, _: Uuid) -> StoreResult<Option<serde_json::Value>> {
        Err(StoreError::Unavailable("tenant_settings".to_string()))
    }
}

/// Store whose named calls never complete; every other call goes to `inner`
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct SlowStore {
    inner: MemoryStore,
    stalled: std::collections::HashSet<&'static str>,
}

#[cfg(test)]
impl SlowStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            stalled: Default::default(),
        }
    }

    pub fn stall(mut self, operation: &'static str) -> Self {
        self.stalled.insert(operation);
        self
    }

    async fn gate(&self, operation: &'static str) {
        if self.stalled.contains(operation) {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SchedulingStore for SlowStore {
    async fn find_service(&self, tenant_id: Option<Uuid>, service_id: Uuid) -> StoreResult<Option<Service>> {
        self.gate("find_service").await;
        self.inner.find_service(tenant_id, service_id).await
    }

    async fn list_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<Vec<Booking>> {
        self.gate("list_blocking_bookings").await;
        self.inner.list_blocking_bookings(query).await
    }

    async fn count_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<i64> {
        self.gate("count_blocking_bookings").await;
        self.inner.count_blocking_bookings(query).await
    }

    async fn find_booking(&self, tenant_id: Option<Uuid>, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        self.gate("find_booking").await;
        self.inner.find_booking(tenant_id, booking_id).await
    }

    async fn commit_booking(&self, write: &BookingWrite, guard: &CommitGuard) -> StoreResult<BookingCommit> {
        self.gate("commit_booking").await;
        self.inner.commit_booking(write, guard).await
    }

    async fn update_booking_status(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        self.gate("update_booking_status").await;
        self.inner.update_booking_status(tenant_id, booking_id, from, to).await
    }

    async fn find_service_request(
        &self,
        tenant_id: Option<Uuid>,
        request_id: Uuid,
    ) -> StoreResult<Option<ServiceRequest>> {
        self.gate("find_service_request").await;
        self.inner.find_service_request(tenant_id, request_id).await
    }

    async fn find_team_member(&self, tenant_id: Option<Uuid>, member_id: Uuid) -> StoreResult<Option<TeamMember>> {
        self.gate("find_team_member").await;
        self.inner.find_team_member(tenant_id, member_id).await
    }

    async fn list_assignable_members(&self, tenant_id: Option<Uuid>) -> StoreResult<Vec<TeamMember>> {
        self.gate("list_assignable_members").await;
        self.inner.list_assignable_members(tenant_id).await
    }

    async fn active_workloads(&self, tenant_id: Option<Uuid>, member_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, i64>> {
        self.gate("active_workloads").await;
        self.inner.active_workloads(tenant_id, member_ids).await
    }

    async fn assign_request(&self, assignment: &RequestAssignment) -> StoreResult<Option<ServiceRequest>> {
        self.gate("assign_request").await;
        self.inner.assign_request(assignment).await
    }

    async fn latest_exchange_rate(&self, base: &str, target: &str) -> StoreResult<Option<ExchangeRate>> {
        self.gate("latest_exchange_rate").await;
        self.inner.latest_exchange_rate(base, target).await
    }

    async fn tenant_settings(&self, tenant_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        self.gate("tenant_settings").await;
        self.inner.tenant_settings(tenant_id).await
    }
}
