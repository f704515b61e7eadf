// Error handling module for the booking API
// Provides the HTTP error type and its conversion from scheduling errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use crate::scheduling::error::SchedulingError;
use crate::store::StoreError;

/// Main error type for the API
/// All handlers return Result<T, ApiError>
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed `validator` checks
    /// Maps to HTTP 400 Bad Request
    ValidationError(validator::ValidationErrors),

    /// Malformed input detected outside the body validators
    /// Maps to HTTP 400 Bad Request
    BadRequest(String),

    /// Resource not found by ID (or outside the caller's tenant)
    /// Maps to HTTP 404 Not Found
    NotFound {
        resource: String,
        id: String,
    },

    /// Booking conflict
    /// Maps to HTTP 409 Conflict
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Entity state or status transition does not allow the operation
    /// Maps to HTTP 422 Unprocessable Entity
    Unprocessable {
        error_code: &'static str,
        message: String,
    },

    /// Database operation errors
    /// Maps to HTTP 500; details are kept out of the response
    DatabaseError(String),

    /// Internal server errors
    /// Maps to HTTP 500; details are kept out of the response
    InternalError(String),

    /// Store or cache could not be reached
    /// Maps to HTTP 503 Service Unavailable
    Unavailable(String),

    /// An external call exceeded its time bound
    /// Maps to HTTP 504 Gateway Timeout
    Timeout(String),
}

/// Consistent error response structure
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "VALIDATION_ERROR", "CONFLICT")
    pub error_code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (field errors, conflict reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,

    /// RFC 3339 timestamp of when the error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    fn new(error_code: &str, message: String, details: Option<serde_json::Value>) -> Self {
        Self {
            error_code: error_code.to_string(),
            message,
            details,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = self.to_error_response();
        (status, Json(error_response)).into_response()
    }
}

impl ApiError {
    /// Convert ApiError to HTTP status code and ErrorResponse
    ///
    /// Logging severity follows the error class:
    /// - error!: database and internal errors
    /// - warn!: conflicts, unavailable collaborators and timeouts
    /// - debug!: expected client errors
    fn to_error_response(&self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::ValidationError(errors) => {
                debug!("Validation error: {:?}", errors);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new(
                        "VALIDATION_ERROR",
                        "Request validation failed".to_string(),
                        Some(serde_json::to_value(errors).unwrap_or(json!({}))),
                    ),
                )
            }
            ApiError::BadRequest(message) => {
                debug!("Bad request: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new("BAD_REQUEST", message.clone(), None),
                )
            }
            ApiError::NotFound { resource, id } => {
                debug!("Resource not found: {} with id {}", resource, id);
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new(
                        "NOT_FOUND",
                        format!("{} with id {} not found", resource, id),
                        None,
                    ),
                )
            }
            ApiError::Conflict { message, details } => {
                warn!("Conflict error: {}", message);
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::new("CONFLICT", message.clone(), details.clone()),
                )
            }
            ApiError::Unprocessable { error_code, message } => {
                debug!("Unprocessable request: {}", message);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorResponse::new(error_code, message.clone(), None),
                )
            }
            ApiError::DatabaseError(db_error) => {
                error!("Database error: {}", db_error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("DATABASE_ERROR", "A database error occurred".to_string(), None),
                )
            }
            ApiError::InternalError(internal_msg) => {
                error!("Internal error: {}", internal_msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "INTERNAL_ERROR",
                        "An internal server error occurred".to_string(),
                        None,
                    ),
                )
            }
            ApiError::Unavailable(message) => {
                warn!("Dependency unavailable: {}", message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::new(
                        "SERVICE_UNAVAILABLE",
                        "A backing service is unavailable".to_string(),
                        None,
                    ),
                )
            }
            ApiError::Timeout(operation) => {
                warn!("Operation timed out: {}", operation);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorResponse::new(
                        "TIMEOUT",
                        format!("Operation {} timed out", operation),
                        None,
                    ),
                )
            }
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Convert scheduling errors to ApiError
impl From<SchedulingError> for ApiError {
    fn from(error: SchedulingError) -> Self {
        match error {
            SchedulingError::NotFound { entity, id } => ApiError::NotFound {
                resource: entity.to_string(),
                id: id.to_string(),
            },
            SchedulingError::Conflict {
                reason,
                conflicting_booking_id,
            } => ApiError::Conflict {
                message: format!("Booking conflicts with the calendar ({})", reason),
                details: Some(json!({
                    "reason": reason,
                    "conflicting_booking_id": conflicting_booking_id,
                })),
            },
            SchedulingError::Validation(message) => ApiError::BadRequest(message),
            SchedulingError::InvalidState(message) => ApiError::Unprocessable {
                error_code: "INVALID_STATE",
                message,
            },
            SchedulingError::InvalidTransition(message) => ApiError::Unprocessable {
                error_code: "INVALID_TRANSITION",
                message,
            },
            SchedulingError::InvalidConfiguration(message) => {
                ApiError::InternalError(format!("Invalid tenant configuration: {}", message))
            }
            SchedulingError::Timeout { operation } => ApiError::Timeout(operation.to_string()),
            SchedulingError::Upstream(store_error) => store_error.into(),
        }
    }
}

/// Convert store errors to ApiError
impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(e) => ApiError::DatabaseError(e.to_string()),
            StoreError::Serialization(e) => ApiError::InternalError(e.to_string()),
            StoreError::Cache(e) => ApiError::Unavailable(e.to_string()),
            StoreError::Unavailable(what) => ApiError::Unavailable(what),
        }
    }
}

/// Convert validator errors to ApiError
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors)
    }
}
