//! HTTP handlers for challan-service.

pub mod challan;
pub mod health;
pub mod payment;

pub use health::{api_health, health_check, metrics_handler, readiness_check};
