use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::models::{LedgerState, OutboxEntry, Payment};
use crate::services::ledger::observe_outcome;
use crate::services::metrics;
use crate::services::store::{LedgerStore, StoreError};

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub replayed: usize,
    pub replay_failed: usize,
    pub promoted: usize,
    pub still_recorded: usize,
}

/// Periodically replays the ledger outbox and finishes challan updates for
/// payments left in `Recorded`.
pub struct Reconciler {
    config: ReconcilerConfig,
    store: Arc<dyn LedgerStore>,
    shutdown_token: CancellationToken,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            config,
            store,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Reconciler disabled by configuration");
            return None;
        }

        tracing::info!(
            interval_secs = self.config.interval().as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Starting reconciler"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report != ReconcileReport::default() => {
                                tracing::info!(?report, "Reconciliation pass complete");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
                        }
                    }
                }
            }
        }))
    }

    /// One pass: drain the outbox, then sweep unreconciled payments.
    ///
    /// Only the listing queries abort a pass. Failures while settling a
    /// single entry are logged and the pass moves on.
    pub async fn run_once(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();
        let max_attempts = self.config.max_attempts;

        for entry in self
            .store
            .pending_outbox(self.config.batch_size, max_attempts)
            .await?
        {
            if self.replay(&entry).await {
                report.replayed += 1;
            } else {
                report.replay_failed += 1;
            }
        }

        for payment in self
            .store
            .list_unreconciled_payments(self.config.batch_size, max_attempts)
            .await?
        {
            if self.sweep(&payment).await {
                report.promoted += 1;
            } else {
                report.still_recorded += 1;
            }
        }

        Ok(report)
    }

    /// Returns whether the entry is now settled.
    async fn replay(&self, entry: &OutboxEntry) -> bool {
        let record = entry.record();
        match self.store.record_payment(record).await {
            Ok(outcome) => {
                observe_outcome(&outcome);
                self.close(entry).await;
                tracing::info!(
                    gateway_payment_id = %entry.gateway_payment_id,
                    receipt_number = %record.receipt_number,
                    attempts = entry.attempts + 1,
                    "Outbox entry replayed"
                );
                true
            }
            Err(StoreError::DuplicatePayment(_)) => {
                self.close(entry).await;
                tracing::info!(
                    gateway_payment_id = %entry.gateway_payment_id,
                    "Outbox entry already recorded"
                );
                true
            }
            Err(e) => {
                let reason = e.to_string();
                metrics::record_outbox("failed");
                match self.store.fail_outbox(entry.id, &reason).await {
                    Ok(attempts) if attempts >= self.config.max_attempts => {
                        metrics::record_outbox("parked");
                        tracing::error!(
                            gateway_payment_id = %entry.gateway_payment_id,
                            receipt_number = %record.receipt_number,
                            attempts = attempts,
                            error = %reason,
                            "Outbox entry exhausted retries, manual recovery required"
                        );
                    }
                    Ok(attempts) => tracing::warn!(
                        gateway_payment_id = %entry.gateway_payment_id,
                        attempts = attempts,
                        error = %reason,
                        "Outbox replay failed"
                    ),
                    Err(bookkeeping) => tracing::error!(
                        gateway_payment_id = %entry.gateway_payment_id,
                        error = %reason,
                        bookkeeping_error = %bookkeeping,
                        "Outbox replay failed and attempt was not recorded"
                    ),
                }
                false
            }
        }
    }

    async fn close(&self, entry: &OutboxEntry) {
        match self.store.complete_outbox(entry.id).await {
            Ok(()) => metrics::record_outbox("replayed"),
            Err(e) => tracing::error!(
                gateway_payment_id = %entry.gateway_payment_id,
                error = %e,
                "Failed to close outbox entry"
            ),
        }
    }

    /// Returns whether the payment was promoted to `Reconciled`.
    async fn sweep(&self, payment: &Payment) -> bool {
        match self.try_sweep(payment).await {
            Ok(promoted) => promoted,
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "Sweep failed");
                false
            }
        }
    }

    async fn try_sweep(&self, payment: &Payment) -> Result<bool, StoreError> {
        let requested = payment.challan_ids.len();
        let updated = self.store.mark_challans_paid(&payment.challan_ids).await?;
        let next = LedgerState::Recorded.after_challan_update(requested, updated)?;

        if next == LedgerState::Reconciled {
            self.store.promote_reconciled(payment.id).await?;
            metrics::record_challans_paid(updated);
            tracing::info!(payment_id = %payment.id, "Payment reconciled");
            return Ok(true);
        }

        metrics::record_challan_mismatch();
        let attempts = self.store.record_reconcile_attempt(payment.id).await?;
        if attempts >= self.config.max_attempts {
            metrics::record_sweep_parked();
            tracing::error!(
                payment_id = %payment.id,
                gateway_payment_id = %payment.gateway_payment_id,
                requested = requested,
                updated = updated,
                attempts = attempts,
                "Payment challans never matched, dropping from sweep"
            );
        } else {
            tracing::warn!(
                payment_id = %payment.id,
                requested = requested,
                updated = updated,
                attempts = attempts,
                "Payment still has unmatched challans"
            );
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        new_receipt_number, paid_at_now, ChallanStatus, LedgerRecord, PaymentDetails,
        VerifiedPayment,
    };
    use crate::services::store::memory::ChallanSeed;
    use crate::services::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            enabled: true,
            interval_secs: 1,
            batch_size: 10,
            max_attempts: 3,
        }
    }

    fn record(payment_id: &str, challan_ids: &[Uuid]) -> LedgerRecord {
        let challans = challan_ids
            .iter()
            .map(|id| serde_json::from_value(serde_json::json!({ "dbId": id })).unwrap())
            .collect();
        LedgerRecord {
            receipt_number: new_receipt_number(),
            paid_at: paid_at_now(),
            payment: VerifiedPayment::new(PaymentDetails {
                gateway_order_id: "order_1".to_string(),
                gateway_payment_id: payment_id.to_string(),
                gateway_signature: "sig".to_string(),
                vehicle_number: "MH12AB1234".to_string(),
                challans,
                subtotal: dec!(500),
                convenience_fee: dec!(0),
                total_amount: dec!(500),
                user_email: None,
            }),
        }
    }

    fn seed(store: &InMemoryStore) -> Uuid {
        let vehicle = store.insert_vehicle("MH-12-AB-1234", "Car", None).unwrap();
        store
            .insert_challan(
                vehicle.id,
                ChallanSeed {
                    challan_number: "CH-1",
                    violation_type: "Signal Jump",
                    description: None,
                    amount: dec!(500),
                    status: ChallanStatus::Pending,
                    fine_date: None,
                    fine_time: None,
                    location: None,
                },
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn replays_outbox_with_original_receipt_number() {
        let store = Arc::new(InMemoryStore::new());
        let challan_id = seed(&store);
        let rec = record("pay_1", &[challan_id]);
        store.enqueue_outbox(&rec, "connection reset").await.unwrap();

        let reconciler = Reconciler::new(config(), store.clone());
        let report = reconciler.run_once().await.unwrap();

        assert_eq!(report.replayed, 1);
        assert!(store.pending_outbox(10, 3).await.unwrap().is_empty());
        let receipt = store
            .find_receipt_by_gateway_payment_id("pay_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.receipt_number, rec.receipt_number);
        assert_eq!(
            store.challan(challan_id).unwrap().parsed_status(),
            Some(ChallanStatus::Paid)
        );
    }

    #[tokio::test]
    async fn failed_replay_counts_attempt() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue_outbox(&record("pay_1", &[]), "down").await.unwrap();
        store.fail_writes(true);

        let reconciler = Reconciler::new(config(), store.clone());
        let report = reconciler.run_once().await.unwrap();

        assert_eq!(report.replay_failed, 1);
        let entry = &store.outbox()[0];
        assert_eq!(entry.attempts, 1);
        assert!(entry.is_pending());
        assert_eq!(
            entry.last_error.as_deref(),
            Some("store unavailable: ledger writes disabled")
        );
    }

    #[tokio::test]
    async fn already_recorded_entry_is_closed() {
        let store = Arc::new(InMemoryStore::new());
        let rec = record("pay_1", &[]);
        store.record_payment(&rec).await.unwrap();
        store.enqueue_outbox(&rec, "timeout").await.unwrap();

        let report = Reconciler::new(config(), store.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(store.payments().len(), 1);
    }

    #[tokio::test]
    async fn sweep_promotes_once_challan_exists() {
        let store = Arc::new(InMemoryStore::new());
        let vehicle = store.insert_vehicle("MH-12-AB-1234", "Car", None).unwrap();
        let late_id = Uuid::new_v4();
        store.record_payment(&record("pay_1", &[late_id])).await.unwrap();

        let reconciler = Reconciler::new(config(), store.clone());
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.still_recorded, 1);

        store
            .insert_challan_with_id(
                late_id,
                vehicle.id,
                ChallanSeed {
                    challan_number: "CH-LATE",
                    violation_type: "No Parking",
                    description: None,
                    amount: dec!(500),
                    status: ChallanStatus::Pending,
                    fine_date: None,
                    fine_time: None,
                    location: None,
                },
            )
            .unwrap();

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.promoted, 1);
        assert!(store.list_unreconciled_payments(10, 3).await.unwrap().is_empty());
        assert_eq!(
            store.challan(late_id).unwrap().parsed_status(),
            Some(ChallanStatus::Paid)
        );
    }

    #[tokio::test]
    async fn stale_payment_does_not_starve_later_ones() {
        let store = Arc::new(InMemoryStore::new());
        let vehicle = store.insert_vehicle("MH-12-AB-1234", "Car", None).unwrap();
        store
            .record_payment(&record("pay_stale", &[Uuid::new_v4()]))
            .await
            .unwrap();
        let late_id = Uuid::new_v4();
        store.record_payment(&record("pay_late", &[late_id])).await.unwrap();
        store
            .insert_challan_with_id(
                late_id,
                vehicle.id,
                ChallanSeed {
                    challan_number: "CH-LATE",
                    violation_type: "No Parking",
                    description: None,
                    amount: dec!(500),
                    status: ChallanStatus::Pending,
                    fine_date: None,
                    fine_time: None,
                    location: None,
                },
            )
            .unwrap();

        let mut cfg = config();
        cfg.batch_size = 1;
        let reconciler = Reconciler::new(cfg, store.clone());

        let first = reconciler.run_once().await.unwrap();
        assert_eq!(first.still_recorded, 1);
        let second = reconciler.run_once().await.unwrap();
        assert_eq!(second.promoted, 1);
        assert_eq!(
            store.challan(late_id).unwrap().parsed_status(),
            Some(ChallanStatus::Paid)
        );
    }

    #[tokio::test]
    async fn stale_payment_leaves_sweep_at_attempt_cap() {
        let store = Arc::new(InMemoryStore::new());
        store
            .record_payment(&record("pay_stale", &[Uuid::new_v4()]))
            .await
            .unwrap();
        let reconciler = Reconciler::new(config(), store.clone());

        for _ in 0..3 {
            assert_eq!(reconciler.run_once().await.unwrap().still_recorded, 1);
        }

        assert_eq!(reconciler.run_once().await.unwrap(), ReconcileReport::default());
        let payment = &store.payments()[0];
        assert_eq!(payment.reconcile_attempts, 3);
        assert_eq!(payment.parsed_state(), Some(LedgerState::Recorded));
    }

    #[tokio::test]
    async fn outbox_entry_stops_replaying_at_attempt_cap() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue_outbox(&record("pay_1", &[]), "down").await.unwrap();
        store.fail_writes(true);
        let reconciler = Reconciler::new(config(), store.clone());

        for _ in 0..3 {
            assert_eq!(reconciler.run_once().await.unwrap().replay_failed, 1);
        }
        assert_eq!(reconciler.run_once().await.unwrap(), ReconcileReport::default());

        let entry = &store.outbox()[0];
        assert_eq!(entry.attempts, 3);
        assert!(entry.is_pending());
    }

    #[tokio::test]
    async fn outbox_bookkeeping_failure_does_not_abort_pass() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue_outbox(&record("pay_1", &[]), "down").await.unwrap();
        store.enqueue_outbox(&record("pay_2", &[]), "down").await.unwrap();
        store
            .record_payment(&record("pay_3", &[Uuid::new_v4()]))
            .await
            .unwrap();
        store.fail_outbox_writes(true);

        let report = Reconciler::new(config(), store.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(report.still_recorded, 1);
        assert!(store.outbox().iter().all(|e| e.is_pending()));
    }

    #[tokio::test]
    async fn start_respects_disabled_flag() {
        let mut cfg = config();
        cfg.enabled = false;
        let reconciler = Reconciler::new(cfg, Arc::new(InMemoryStore::new()));
        assert!(reconciler.start().is_none());
    }

    #[tokio::test]
    async fn cancelled_worker_exits() {
        let reconciler = Reconciler::new(config(), Arc::new(InMemoryStore::new()));
        let token = reconciler.shutdown_token();
        let handle = reconciler.start().unwrap();
        token.cancel();
        handle.await.unwrap();
    }
}
