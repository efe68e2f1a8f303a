//! Ledger persistence.
//!
//! `LedgerStore` is implemented by `Database` (Postgres) and `InMemoryStore`.
//! Both honour the same contract: `record_payment` is all-or-nothing and
//! rejects a second write for the same gateway payment id with
//! `StoreError::DuplicatePayment`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use challan_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Challan, InvalidTransition, LedgerRecord, LedgerState, OutboxEntry, Payment, ReceiptRecord,
    Vehicle,
};

pub use memory::InMemoryStore;
pub use postgres::Database;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payment {0} is already recorded")]
    DuplicatePayment(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicatePayment(id) => {
                AppError::Conflict(anyhow::anyhow!("Payment {} is already recorded", id))
            }
            StoreError::Database(e) => AppError::from(e),
            StoreError::Unavailable(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
            StoreError::InvalidTransition(e) => AppError::InternalError(e.into()),
        }
    }
}

/// Result of one successful ledger write.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub payment_id: Uuid,
    pub state: LedgerState,
    pub challans_requested: usize,
    pub challans_updated: u64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Write payment, receipt and challan status for one verified payment
    /// as a single unit. Payment lands as `Recorded` and is promoted to
    /// `Reconciled` when every referenced challan matched.
    async fn record_payment(&self, record: &LedgerRecord) -> Result<RecordOutcome, StoreError>;

    /// Bulk-set the given challans to PAID. Returns matched rows.
    async fn mark_challans_paid(&self, challan_ids: &[Uuid]) -> Result<u64, StoreError>;

    async fn find_receipt_by_number(
        &self,
        receipt_number: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError>;

    async fn find_receipt_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError>;

    /// Newest first by payment date.
    async fn list_receipts_by_email(&self, email: &str) -> Result<Vec<ReceiptRecord>, StoreError>;

    /// Payments still in `Recorded` with fewer than `max_attempts` sweeps,
    /// least recently swept first so stale payments rotate to the back.
    async fn list_unreconciled_payments(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<Payment>, StoreError>;

    /// Note a sweep that left the payment in `Recorded`. Returns the new
    /// attempt count.
    async fn record_reconcile_attempt(&self, payment_id: Uuid) -> Result<i32, StoreError>;

    async fn promote_reconciled(&self, payment_id: Uuid) -> Result<(), StoreError>;

    /// Park a verified payment for replay and return the record that is
    /// parked. When an entry for the same gateway payment id already exists
    /// its record is kept and returned, so the first receipt number wins.
    async fn enqueue_outbox(
        &self,
        record: &LedgerRecord,
        error: &str,
    ) -> Result<LedgerRecord, StoreError>;

    async fn find_outbox_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<OutboxEntry>, StoreError>;

    /// Unprocessed entries with fewer than `max_attempts` failed replays,
    /// fewest attempts first, then oldest.
    async fn pending_outbox(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn complete_outbox(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failed replay. Returns the new attempt count.
    async fn fail_outbox(&self, id: Uuid, error: &str) -> Result<i32, StoreError>;

    /// Vehicle whose number matches `normalized` after stripping separators.
    async fn find_vehicle(&self, normalized: &str) -> Result<Option<Vehicle>, StoreError>;

    /// Newest fine first.
    async fn list_challans_for_vehicle(&self, vehicle_id: Uuid)
        -> Result<Vec<Challan>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Uppercase and drop everything but ASCII letters and digits, so
/// `mh-12-ab-1234` and `MH12AB1234` name the same vehicle.
pub fn normalize_vehicle_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_vehicle_numbers() {
        assert_eq!(normalize_vehicle_number("mh-12-ab-1234"), "MH12AB1234");
        assert_eq!(normalize_vehicle_number(" KA 01 MJ 2023 "), "KA01MJ2023");
        assert_eq!(normalize_vehicle_number("--"), "");
    }

    #[test]
    fn duplicate_maps_to_conflict() {
        let err: AppError = StoreError::DuplicatePayment("pay_1".to_string()).into();
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }
}
