//! Postgres ledger store.

use async_trait::async_trait;
use challan_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{LedgerStore, RecordOutcome, StoreError};
use crate::models::{
    Challan, LedgerRecord, LedgerState, OutboxEntry, Payment, PaymentStatus, ReceiptRecord,
    Vehicle, PAYMENT_METHOD_RAZORPAY,
};
use crate::services::metrics::QueryTimer;

const RECEIPT_COLUMNS: &str = r#"
    r.id, r.receipt_number, r.payment_id, r.gateway_payment_id, r.vehicle_number,
    r.user_email, r.challan_details, r.amount_paid, r.payment_date, r.email_sent,
    r.sms_sent, p.gateway_order_id, p.subtotal, p.convenience_fee, p.state
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, vehicle_number, challan_ids, subtotal, convenience_fee, total_amount,
    payment_method, gateway_order_id, gateway_payment_id, gateway_signature,
    status, state, paid_at, created_at, reconcile_attempts, last_reconcile_at
"#;

const OUTBOX_COLUMNS: &str = r#"
    id, gateway_payment_id, payload, attempts, last_error, created_at, processed_at
"#;

const CHALLAN_COLUMNS: &str = r#"
    id, vehicle_id, challan_number, violation_type, description, amount, status,
    fine_date, fine_time, location, proof_image_url, updated_at
"#;

/// True for a unique violation on either gateway payment id constraint.
fn is_duplicate_payment(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => matches!(
            db_err.constraint(),
            Some("payments_gateway_payment_id_key") | Some("receipts_gateway_payment_id_key")
        ),
        _ => false,
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "challan-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn mark_paid_in(
        tx: &mut Transaction<'_, Postgres>,
        challan_ids: &[Uuid],
    ) -> Result<u64, sqlx::Error> {
        if challan_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE challans SET status = 'PAID', updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(challan_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(
        skip(self, record),
        fields(
            gateway_payment_id = %record.details().gateway_payment_id,
            receipt_number = %record.receipt_number
        )
    )]
    async fn record_payment(&self, record: &LedgerRecord) -> Result<RecordOutcome, StoreError> {
        let timer = QueryTimer::start("record_payment");
        let details = record.details();
        let challan_ids = record.challan_ids();
        let payment_id = Uuid::new_v4();

        let result: Result<RecordOutcome, StoreError> = async {
            let recorded = record.payment.state().advance(LedgerState::Recorded)?;

            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO payments (id, vehicle_number, challan_ids, subtotal, convenience_fee,
                    total_amount, payment_method, gateway_order_id, gateway_payment_id,
                    gateway_signature, status, state, paid_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(payment_id)
            .bind(&details.vehicle_number)
            .bind(&challan_ids)
            .bind(details.subtotal)
            .bind(details.convenience_fee)
            .bind(details.total_amount)
            .bind(PAYMENT_METHOD_RAZORPAY)
            .bind(&details.gateway_order_id)
            .bind(&details.gateway_payment_id)
            .bind(&details.gateway_signature)
            .bind(PaymentStatus::Success.as_str())
            .bind(recorded.as_str())
            .bind(record.paid_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO receipts (id, receipt_number, payment_id, gateway_payment_id,
                    vehicle_number, user_email, challan_details, amount_paid, payment_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&record.receipt_number)
            .bind(payment_id)
            .bind(&details.gateway_payment_id)
            .bind(&details.vehicle_number)
            .bind(&details.user_email)
            .bind(Json(&details.challans))
            .bind(details.total_amount)
            .bind(record.paid_at)
            .execute(&mut *tx)
            .await?;

            let updated = Self::mark_paid_in(&mut tx, &challan_ids).await?;
            let state = recorded.after_challan_update(challan_ids.len(), updated)?;
            if state != recorded {
                sqlx::query("UPDATE payments SET state = $2 WHERE id = $1")
                    .bind(payment_id)
                    .bind(state.as_str())
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;

            Ok(RecordOutcome {
                payment_id,
                state,
                challans_requested: challan_ids.len(),
                challans_updated: updated,
            })
        }
        .await;

        timer.observe_duration();

        match result {
            Ok(outcome) => {
                info!(
                    payment_id = %outcome.payment_id,
                    state = %outcome.state,
                    challans_updated = outcome.challans_updated,
                    "Payment recorded"
                );
                Ok(outcome)
            }
            Err(StoreError::Database(e)) if is_duplicate_payment(&e) => Err(
                StoreError::DuplicatePayment(details.gateway_payment_id.clone()),
            ),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, challan_ids), fields(count = challan_ids.len()))]
    async fn mark_challans_paid(&self, challan_ids: &[Uuid]) -> Result<u64, StoreError> {
        if challan_ids.is_empty() {
            return Ok(0);
        }
        let timer = QueryTimer::start("mark_challans_paid");
        let result = sqlx::query(
            "UPDATE challans SET status = 'PAID', updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(challan_ids)
        .execute(&self.pool)
        .await?;
        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_receipt_by_number(
        &self,
        receipt_number: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError> {
        let timer = QueryTimer::start("find_receipt_by_number");
        let query = format!(
            "SELECT {} FROM receipts r LEFT JOIN payments p ON p.id = r.payment_id \
             WHERE r.receipt_number = $1",
            RECEIPT_COLUMNS
        );
        let receipt = sqlx::query_as::<_, ReceiptRecord>(&query)
            .bind(receipt_number)
            .fetch_optional(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(receipt)
    }

    #[instrument(skip(self))]
    async fn find_receipt_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError> {
        let timer = QueryTimer::start("find_receipt_by_gateway_payment_id");
        let query = format!(
            "SELECT {} FROM receipts r LEFT JOIN payments p ON p.id = r.payment_id \
             WHERE r.gateway_payment_id = $1",
            RECEIPT_COLUMNS
        );
        let receipt = sqlx::query_as::<_, ReceiptRecord>(&query)
            .bind(gateway_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(receipt)
    }

    #[instrument(skip(self, email))]
    async fn list_receipts_by_email(&self, email: &str) -> Result<Vec<ReceiptRecord>, StoreError> {
        let timer = QueryTimer::start("list_receipts_by_email");
        let query = format!(
            "SELECT {} FROM receipts r LEFT JOIN payments p ON p.id = r.payment_id \
             WHERE r.user_email = $1 ORDER BY r.payment_date DESC",
            RECEIPT_COLUMNS
        );
        let receipts = sqlx::query_as::<_, ReceiptRecord>(&query)
            .bind(email)
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(receipts)
    }

    #[instrument(skip(self))]
    async fn list_unreconciled_payments(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<Payment>, StoreError> {
        let timer = QueryTimer::start("list_unreconciled_payments");
        let query = format!(
            "SELECT {} FROM payments WHERE state = $1 AND reconcile_attempts < $2 \
             ORDER BY last_reconcile_at NULLS FIRST, created_at LIMIT $3",
            PAYMENT_COLUMNS
        );
        let payments = sqlx::query_as::<_, Payment>(&query)
            .bind(LedgerState::Recorded.as_str())
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(payments)
    }

    #[instrument(skip(self))]
    async fn record_reconcile_attempt(&self, payment_id: Uuid) -> Result<i32, StoreError> {
        let attempts: (i32,) = sqlx::query_as(
            r#"
            UPDATE payments
            SET reconcile_attempts = reconcile_attempts + 1, last_reconcile_at = NOW()
            WHERE id = $1
            RETURNING reconcile_attempts
            "#,
        )
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts.0)
    }

    #[instrument(skip(self))]
    async fn promote_reconciled(&self, payment_id: Uuid) -> Result<(), StoreError> {
        let timer = QueryTimer::start("promote_reconciled");
        let from = LedgerState::Recorded;
        let to = from.advance(LedgerState::Reconciled)?;
        sqlx::query("UPDATE payments SET state = $2 WHERE id = $1 AND state = $3")
            .bind(payment_id)
            .bind(to.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, record), fields(gateway_payment_id = %record.details().gateway_payment_id))]
    async fn enqueue_outbox(
        &self,
        record: &LedgerRecord,
        error: &str,
    ) -> Result<LedgerRecord, StoreError> {
        let timer = QueryTimer::start("enqueue_outbox");
        // The conflict arm keeps the stored payload so the first receipt
        // number minted for this payment stays the one handed out.
        let parked: (Json<LedgerRecord>, bool) = sqlx::query_as(
            r#"
            INSERT INTO ledger_outbox (id, gateway_payment_id, payload, last_error)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (gateway_payment_id) DO UPDATE SET last_error = EXCLUDED.last_error
            RETURNING payload, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.details().gateway_payment_id)
        .bind(Json(record))
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        timer.observe_duration();

        let (Json(parked), inserted) = parked;
        if !inserted {
            warn!(
                receipt_number = %parked.receipt_number,
                "Outbox entry already present, keeping parked receipt"
            );
        }
        Ok(parked)
    }

    #[instrument(skip(self))]
    async fn find_outbox_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let timer = QueryTimer::start("find_outbox_by_gateway_payment_id");
        let query = format!(
            "SELECT {} FROM ledger_outbox WHERE gateway_payment_id = $1",
            OUTBOX_COLUMNS
        );
        let entry = sqlx::query_as::<_, OutboxEntry>(&query)
            .bind(gateway_payment_id)
            .fetch_optional(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn pending_outbox(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let timer = QueryTimer::start("pending_outbox");
        let query = format!(
            "SELECT {} FROM ledger_outbox WHERE processed_at IS NULL AND attempts < $1 \
             ORDER BY attempts, created_at LIMIT $2",
            OUTBOX_COLUMNS
        );
        let entries = sqlx::query_as::<_, OutboxEntry>(&query)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn complete_outbox(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE ledger_outbox SET processed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn fail_outbox(&self, id: Uuid, error: &str) -> Result<i32, StoreError> {
        let attempts: (i32,) = sqlx::query_as(
            "UPDATE ledger_outbox SET attempts = attempts + 1, last_error = $2 \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts.0)
    }

    #[instrument(skip(self))]
    async fn find_vehicle(&self, normalized: &str) -> Result<Option<Vehicle>, StoreError> {
        let timer = QueryTimer::start("find_vehicle");
        let vehicle = sqlx::query_as::<_, Vehicle>(
            r#"
            SELECT id, vehicle_number, vehicle_type, owner_name, image_url
            FROM vehicles
            WHERE regexp_replace(upper(vehicle_number), '[^A-Z0-9]', '', 'g') = $1
            LIMIT 1
            "#,
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        timer.observe_duration();
        Ok(vehicle)
    }

    #[instrument(skip(self))]
    async fn list_challans_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<Challan>, StoreError> {
        let timer = QueryTimer::start("list_challans_for_vehicle");
        let query = format!(
            "SELECT {} FROM challans WHERE vehicle_id = $1 \
             ORDER BY fine_date DESC NULLS LAST, fine_time DESC NULLS LAST",
            CHALLAN_COLUMNS
        );
        let challans = sqlx::query_as::<_, Challan>(&query)
            .bind(vehicle_id)
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(challans)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
