use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::payment::LedgerRecord;

/// A verified payment whose ledger write failed and is waiting to be
/// replayed by the reconciler.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub gateway_payment_id: String,
    pub payload: Json<LedgerRecord>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn record(&self) -> &LedgerRecord {
        &self.payload.0
    }

    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}
