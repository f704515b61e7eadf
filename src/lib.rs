//! Scheduling core for a multi-tenant service-booking backend: availability,
//! conflict detection, pricing and auto-assignment behind an axum API.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scheduling;
pub mod status_machine;
pub mod store;

pub use error::ApiError;
pub use scheduling::{SchedulingEngine, SchedulingError, SchedulingResult};
