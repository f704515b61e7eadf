// HTTP handlers for the booking endpoints
//
// The caller's tenant comes from the `X-Tenant-Id` header. Request bodies are
// checked with `validator` before reaching the engine.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ErrorResponse};
use crate::models::{Booking, BookingStatus, ServiceRequest};
use crate::scheduling::{
    AssignmentOutcome, AvailabilityRequest, BookingConfirmation, BookingRequest, ConflictRequest,
    ConflictResult, PriceBreakdown, PriceRequest, PricingOptions, SchedulingEngine, Slot,
};

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SchedulingEngine>,
    /// Reject requests without a tenant header
    pub require_tenant: bool,
}

/// Tenant scope of the request, `None` when tenancy is not enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope(pub Option<Uuid>);

#[async_trait]
impl FromRequestParts<AppState> for TenantScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(TENANT_HEADER) else {
            if state.require_tenant {
                return Err(ApiError::BadRequest("X-Tenant-Id header is required".to_string()));
            }
            return Ok(TenantScope(None));
        };

        let tenant = value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ApiError::BadRequest("X-Tenant-Id must be a UUID".to_string()))?;
        Ok(TenantScope(Some(tenant)))
    }
}

/// Query parameters for GET /api/services/:id/availability
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AvailabilityQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[validate(range(min = 15, max = 1440))]
    pub slot_minutes: Option<i32>,
    pub team_member_id: Option<Uuid>,
}

/// Request DTO for a conflict check
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConflictCheckRequest {
    pub service_id: Uuid,
    pub start: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    pub exclude_booking_id: Option<Uuid>,
    pub team_member_id: Option<Uuid>,
}

/// Pricing options shared by quotes and bookings
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct QuoteOptions {
    #[validate(length(min = 1, max = 64))]
    pub promo_code: Option<String>,
    pub emergency: bool,
    /// Surcharge percent, applied only when `emergency` is set
    pub emergency_percent: Option<Decimal>,
    #[validate(length(equal = 3))]
    pub target_currency: Option<String>,
}

impl From<QuoteOptions> for PricingOptions {
    fn from(options: QuoteOptions) -> Self {
        PricingOptions {
            promo_code: options.promo_code,
            emergency: options.emergency,
            emergency_percent: options.emergency_percent.unwrap_or(Decimal::ZERO),
            target_currency: options.target_currency,
        }
    }
}

/// Request DTO for a price quote
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QuoteRequest {
    pub service_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    #[validate]
    pub options: QuoteOptions,
}

/// Request DTO for creating a booking
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    pub service_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: Option<i32>,
    pub team_member_id: Option<Uuid>,
    pub service_request_id: Option<Uuid>,
    #[serde(default)]
    #[validate]
    pub options: QuoteOptions,
}

/// Request DTO for moving a booking
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: Option<i32>,
}

/// Request DTO for a booking status change
#[derive(Debug, Deserialize, ToSchema)]
pub struct BookingStatusRequest {
    #[schema(value_type = String, example = "confirmed")]
    pub status: BookingStatus,
}

/// Request DTO for a manual assignment
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssigneeRequest {
    pub team_member_id: Uuid,
    pub assigned_by: Option<Uuid>,
}

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        availability_handler,
        check_conflict_handler,
        quote_handler,
        create_booking_handler,
        reschedule_booking_handler,
        update_booking_status_handler,
        auto_assign_handler,
        reassign_handler,
        get_metrics_handler,
    ),
    components(schemas(
        ConflictCheckRequest,
        QuoteOptions,
        QuoteRequest,
        CreateBookingRequest,
        RescheduleRequest,
        BookingStatusRequest,
        AssigneeRequest,
        ErrorResponse,
    )),
    tags(
        (name = "bookings", description = "Availability, conflicts, quotes and bookings"),
        (name = "assignments", description = "Service request assignment"),
    ),
    info(title = "Booking Core API", version = "0.1.0")
)]
pub struct ApiDoc;

/// Handler for GET /api/services/:id/availability
#[utoipa::path(
    get,
    path = "/api/services/{id}/availability",
    params(("id" = Uuid, Path, description = "Service ID"), AvailabilityQuery),
    responses(
        (status = 200, description = "Slots in chronological order"),
        (status = 400, description = "Invalid range", body = ErrorResponse),
        (status = 404, description = "Service not found", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn availability_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Path(service_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    query.validate()?;
    tracing::debug!("Computing availability of service {} from {} to {}", service_id, query.from, query.to);

    let slots = state
        .engine
        .compute_availability(&AvailabilityRequest {
            tenant_id,
            service_id,
            from: query.from,
            to: query.to,
            slot_minutes: query.slot_minutes,
            team_member_id: query.team_member_id,
        })
        .await?;

    Ok(Json(slots))
}

/// Handler for POST /api/bookings/conflicts
#[utoipa::path(
    post,
    path = "/api/bookings/conflicts",
    request_body = ConflictCheckRequest,
    responses(
        (status = 200, description = "Conflict verdict"),
        (status = 400, description = "Invalid input data", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn check_conflict_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<ConflictCheckRequest>,
) -> Result<Json<ConflictResult>, ApiError> {
    payload.validate()?;

    let result = state
        .engine
        .check_conflict(&ConflictRequest {
            tenant_id,
            service_id: payload.service_id,
            start: payload.start,
            duration_minutes: payload.duration_minutes,
            exclude_booking_id: payload.exclude_booking_id,
            team_member_id: payload.team_member_id,
        })
        .await?;

    Ok(Json(result))
}

/// Handler for POST /api/bookings/quote
#[utoipa::path(
    post,
    path = "/api/bookings/quote",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Itemised price breakdown"),
        (status = 400, description = "Invalid input data", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn quote_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<PriceBreakdown>, ApiError> {
    payload.validate()?;

    let breakdown = state
        .engine
        .calculate_price(&PriceRequest {
            tenant_id,
            service_id: payload.service_id,
            scheduled_at: payload.scheduled_at,
            duration_minutes: payload.duration_minutes,
            options: payload.options.into(),
        })
        .await?;

    Ok(Json(breakdown))
}

/// Handler for POST /api/bookings
/// Creates a booking after the conflict check and quote, then auto-assigns its linked request
#[utoipa::path(
    post,
    path = "/api/bookings",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking created"),
        (status = 400, description = "Invalid input data", body = ErrorResponse),
        (status = 404, description = "Service or service request not found", body = ErrorResponse),
        (status = 409, description = "Booking conflict", body = ErrorResponse),
        (status = 422, description = "Service cannot be booked", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn create_booking_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingConfirmation>), ApiError> {
    payload.validate()?;
    tracing::debug!("Creating booking for service {} at {}", payload.service_id, payload.scheduled_at);

    let confirmation = state
        .engine
        .create_booking(&BookingRequest {
            tenant_id,
            service_id: payload.service_id,
            scheduled_at: payload.scheduled_at,
            duration_minutes: payload.duration_minutes,
            team_member_id: payload.team_member_id,
            service_request_id: payload.service_request_id,
            options: payload.options.into(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(confirmation)))
}

/// Handler for PUT /api/bookings/:id/schedule
/// Moves a pending or confirmed booking to a new window
#[utoipa::path(
    put,
    path = "/api/bookings/{id}/schedule",
    params(("id" = Uuid, Path, description = "Booking ID")),
    request_body = RescheduleRequest,
    responses(
        (status = 200, description = "Booking moved"),
        (status = 404, description = "Booking not found", body = ErrorResponse),
        (status = 409, description = "Booking conflict", body = ErrorResponse),
        (status = 422, description = "Booking is closed", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn reschedule_booking_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<RescheduleRequest>,
) -> Result<Json<Booking>, ApiError> {
    payload.validate()?;

    let booking = state
        .engine
        .reschedule_booking(tenant_id, booking_id, payload.scheduled_at, payload.duration_minutes)
        .await?;

    Ok(Json(booking))
}

/// Handler for PUT /api/bookings/:id/status
#[utoipa::path(
    put,
    path = "/api/bookings/{id}/status",
    params(("id" = Uuid, Path, description = "Booking ID")),
    request_body = BookingStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 404, description = "Booking not found", body = ErrorResponse),
        (status = 422, description = "Transition not allowed", body = ErrorResponse)
    ),
    tag = "bookings"
)]
pub async fn update_booking_status_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<BookingStatusRequest>,
) -> Result<Json<Booking>, ApiError> {
    let booking = state
        .engine
        .transition_booking(tenant_id, booking_id, payload.status)
        .await?;

    Ok(Json(booking))
}

/// Handler for POST /api/service-requests/:id/auto-assign
#[utoipa::path(
    post,
    path = "/api/service-requests/{id}/auto-assign",
    params(("id" = Uuid, Path, description = "Service request ID")),
    responses(
        (status = 200, description = "Assignment outcome"),
        (status = 404, description = "Service request not found", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn auto_assign_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Path(request_id): Path<Uuid>,
) -> Result<Json<AssignmentOutcome>, ApiError> {
    let outcome = state.engine.auto_assign(tenant_id, request_id).await?;
    Ok(Json(outcome))
}

/// Handler for PUT /api/service-requests/:id/assignee
/// Manually assigns a request to an active team member
#[utoipa::path(
    put,
    path = "/api/service-requests/{id}/assignee",
    params(("id" = Uuid, Path, description = "Service request ID")),
    request_body = AssigneeRequest,
    responses(
        (status = 200, description = "Request reassigned"),
        (status = 404, description = "Request or team member not found", body = ErrorResponse),
        (status = 422, description = "Request closed or member inactive", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn reassign_handler(
    State(state): State<AppState>,
    TenantScope(tenant_id): TenantScope,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<AssigneeRequest>,
) -> Result<Json<ServiceRequest>, ApiError> {
    let request = state
        .engine
        .reassign_request(tenant_id, request_id, payload.team_member_id, payload.assigned_by)
        .await?;

    Ok(Json(request))
}

/// Handler for GET /api/metrics
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses((status = 200, description = "Engine performance metrics")),
    tag = "bookings"
)]
pub async fn get_metrics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let summary = state.engine.metrics().summary();
    let operation = |op: &crate::scheduling::metrics::OperationSummary| {
        serde_json::json!({
            "count": op.count,
            "avg_time_ms": format!("{:.2}", op.avg_time_ms),
            "slow_operations": op.slow,
        })
    };

    Json(serde_json::json!({
        "cache": {
            "hit_rate": format!("{:.1}%", summary.cache_hit_rate * 100.0),
            "hits": summary.cache_hits,
            "misses": summary.cache_misses,
        },
        "availability": operation(&summary.availability),
        "conflict": operation(&summary.conflict),
        "pricing": operation(&summary.pricing),
        "assignment": operation(&summary.assignment),
    }))
}

/// Booking API routes without middleware
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/services/:id/availability", get(availability_handler))
        .route("/api/bookings", post(create_booking_handler))
        .route("/api/bookings/conflicts", post(check_conflict_handler))
        .route("/api/bookings/quote", post(quote_handler))
        .route("/api/bookings/:id/schedule", put(reschedule_booking_handler))
        .route("/api/bookings/:id/status", put(update_booking_status_handler))
        .route("/api/service-requests/:id/auto-assign", post(auto_assign_handler))
        .route("/api/service-requests/:id/assignee", put(reassign_handler))
        .route("/api/metrics", get(get_metrics_handler))
}

/// Creates the application router with docs, CORS and request tracing
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
