// PostgreSQL record store
//
// Tenant scoping uses `($n::uuid IS NULL OR tenant_id = $n)` so the same queries
// serve single-tenant deployments. Booking writes lock the service row
// (`FOR UPDATE`) before re-running the conflict guard, which serialises
// concurrent writers for the same service.

use async_trait::async_trait;
use sqlx::{postgres::Postgres, types::Json, Executor, FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    BookingCommit, BookingQuery, BookingWrite, CommitGuard, GuardSnapshot, RequestAssignment,
    SchedulingStore, StoreResult,
};
use crate::models::{
    Booking, BookingStatus, ExchangeRate, Service, ServiceCalendar, ServiceRequest, ServiceStatus,
    TeamMember,
};

const BOOKING_COLUMNS: &str = "id, tenant_id, service_id, scheduled_at, duration_minutes, status, \
     assigned_team_member_id, service_request_id";

const SERVICE_COLUMNS: &str = "id, tenant_id, name, category, status, base_price, \
     standard_duration_minutes, buffer_time_minutes, max_daily_bookings, booking_enabled, calendar";

const REQUEST_COLUMNS: &str = "id, tenant_id, client_id, service_id, status, \
     assigned_team_member_id, assigned_at, assigned_by";

/// Row shape of the `services` table
#[derive(Debug, FromRow)]
struct ServiceRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    category: Option<String>,
    status: ServiceStatus,
    base_price: rust_decimal::Decimal,
    standard_duration_minutes: i32,
    buffer_time_minutes: i32,
    max_daily_bookings: i32,
    booking_enabled: bool,
    calendar: Option<Json<ServiceCalendar>>,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            category: row.category,
            status: row.status,
            base_price: row.base_price,
            standard_duration_minutes: row.standard_duration_minutes,
            buffer_time_minutes: row.buffer_time_minutes,
            max_daily_bookings: row.max_daily_bookings,
            booking_enabled: row.booking_enabled,
            calendar: row.calendar.map(|json| json.0),
        }
    }
}

/// PostgreSQL implementation of [`SchedulingStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_bookings<'e, E>(executor: E, query: &BookingQuery) -> Result<Vec<Booking>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE service_id = $1
              AND ($2::uuid IS NULL OR tenant_id = $2)
              AND ($3::uuid IS NULL OR assigned_team_member_id = $3)
              AND ($4::uuid IS NULL OR id <> $4)
              AND status IN ('pending', 'confirmed')
              AND scheduled_at >= $5 AND scheduled_at < $6
            ORDER BY scheduled_at, id
            "#
        );

        sqlx::query_as::<_, Booking>(&sql)
            .bind(query.service_id)
            .bind(query.tenant_id)
            .bind(query.team_member_id)
            .bind(query.exclude_booking_id)
            .bind(query.from)
            .bind(query.to)
            .fetch_all(executor)
            .await
    }

    async fn count_bookings<'e, E>(executor: E, query: &BookingQuery) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM bookings
            WHERE service_id = $1
              AND ($2::uuid IS NULL OR tenant_id = $2)
              AND ($3::uuid IS NULL OR assigned_team_member_id = $3)
              AND ($4::uuid IS NULL OR id <> $4)
              AND status IN ('pending', 'confirmed')
              AND scheduled_at >= $5 AND scheduled_at < $6
            "#,
        )
        .bind(query.service_id)
        .bind(query.tenant_id)
        .bind(query.team_member_id)
        .bind(query.exclude_booking_id)
        .bind(query.from)
        .bind(query.to)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl SchedulingStore for PgStore {
    async fn find_service(
        &self,
        tenant_id: Option<Uuid>,
        service_id: Uuid,
    ) -> StoreResult<Option<Service>> {
        let sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)"
        );
        let row = sqlx::query_as::<_, ServiceRow>(&sql)
            .bind(service_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Service::from))
    }

    async fn list_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<Vec<Booking>> {
        Ok(Self::fetch_bookings(&self.pool, query).await?)
    }

    async fn count_blocking_bookings(&self, query: &BookingQuery) -> StoreResult<i64> {
        Ok(Self::count_bookings(&self.pool, query).await?)
    }

    async fn find_booking(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
    ) -> StoreResult<Option<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)"
        );
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(booking)
    }

    async fn commit_booking(
        &self,
        write: &BookingWrite,
        guard: &CommitGuard,
    ) -> StoreResult<BookingCommit> {
        // Rolled back on drop unless committed
        let mut tx = self.pool.begin().await?;

        let lock_sql = format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2) FOR UPDATE"
        );
        let service = sqlx::query_as::<_, ServiceRow>(&lock_sql)
            .bind(write.booking.service_id)
            .bind(write.overlap_scope.tenant_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(Service::from);

        let overlapping = Self::fetch_bookings(&mut *tx, &write.overlap_scope).await?;
        let same_day_count = match &write.day_scope {
            Some(scope) => Self::count_bookings(&mut *tx, scope).await?,
            None => 0,
        };

        let verdict = guard(&GuardSnapshot {
            service,
            overlapping,
            same_day_count,
        });
        if verdict.conflict {
            tracing::debug!(
                "Booking {} rejected inside write transaction: {:?}",
                write.booking.id,
                verdict.reason
            );
            return Ok(BookingCommit::Rejected(verdict));
        }

        let upsert_sql = format!(
            r#"
            INSERT INTO bookings ({BOOKING_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                scheduled_at = EXCLUDED.scheduled_at,
                duration_minutes = EXCLUDED.duration_minutes,
                status = EXCLUDED.status,
                assigned_team_member_id = EXCLUDED.assigned_team_member_id
            RETURNING {BOOKING_COLUMNS}
            "#
        );
        let booking = &write.booking;
        let saved = sqlx::query_as::<_, Booking>(&upsert_sql)
            .bind(booking.id)
            .bind(booking.tenant_id)
            .bind(booking.service_id)
            .bind(booking.scheduled_at)
            .bind(booking.duration_minutes)
            .bind(booking.status)
            .bind(booking.assigned_team_member_id)
            .bind(booking.service_request_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(BookingCommit::Saved(saved))
    }

    async fn update_booking_status(
        &self,
        tenant_id: Option<Uuid>,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> StoreResult<Option<Booking>> {
        let sql = format!(
            r#"
            UPDATE bookings SET status = $1
            WHERE id = $2 AND ($3::uuid IS NULL OR tenant_id = $3) AND status = $4
            RETURNING {BOOKING_COLUMNS}
            "#
        );
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(to)
            .bind(booking_id)
            .bind(tenant_id)
            .bind(from)
            .fetch_optional(&self.pool)
            .await?;

        Ok(booking)
    }

    async fn find_service_request(
        &self,
        tenant_id: Option<Uuid>,
        request_id: Uuid,
    ) -> StoreResult<Option<ServiceRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM service_requests WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)"
        );
        let request = sqlx::query_as::<_, ServiceRequest>(&sql)
            .bind(request_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    async fn find_team_member(
        &self,
        tenant_id: Option<Uuid>,
        member_id: Uuid,
    ) -> StoreResult<Option<TeamMember>> {
        let member = sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT id, tenant_id, name, status, is_available, specialties
            FROM team_members
            WHERE id = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(member_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    async fn list_assignable_members(
        &self,
        tenant_id: Option<Uuid>,
    ) -> StoreResult<Vec<TeamMember>> {
        let members = sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT id, tenant_id, name, status, is_available, specialties
            FROM team_members
            WHERE status = 'active' AND is_available = true
              AND ($1::uuid IS NULL OR tenant_id = $1)
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn active_workloads(
        &self,
        tenant_id: Option<Uuid>,
        member_ids: &[Uuid],
    ) -> StoreResult<HashMap<Uuid, i64>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT assigned_team_member_id, COUNT(*)
            FROM service_requests
            WHERE assigned_team_member_id = ANY($1)
              AND status IN ('assigned', 'in_progress')
              AND ($2::uuid IS NULL OR tenant_id = $2)
            GROUP BY assigned_team_member_id
            "#,
        )
        .bind(member_ids)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn assign_request(
        &self,
        assignment: &RequestAssignment,
    ) -> StoreResult<Option<ServiceRequest>> {
        let sql = format!(
            r#"
            UPDATE service_requests
            SET assigned_team_member_id = $1,
                assigned_at = $2,
                assigned_by = $3,
                status = $4
            WHERE id = $5
              AND ($6::uuid IS NULL OR tenant_id = $6)
              AND (NOT $7 OR assigned_team_member_id IS NULL)
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let request = sqlx::query_as::<_, ServiceRequest>(&sql)
            .bind(assignment.team_member_id)
            .bind(assignment.assigned_at)
            .bind(assignment.assigned_by)
            .bind(assignment.status)
            .bind(assignment.request_id)
            .bind(assignment.tenant_id)
            .bind(assignment.only_if_unassigned)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    async fn latest_exchange_rate(
        &self,
        base: &str,
        target: &str,
    ) -> StoreResult<Option<ExchangeRate>> {
        let rate = sqlx::query_as::<_, ExchangeRate>(
            r#"
            SELECT base, target, rate, fetched_at
            FROM exchange_rates
            WHERE upper(base) = upper($1) AND upper(target) = upper($2)
            ORDER BY fetched_at DESC
            LIMIT 1
            "#,
        )
        .bind(base)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rate)
    }

    async fn tenant_settings(&self, tenant_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        let settings: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT settings FROM tenant_settings WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(settings)
    }
}
