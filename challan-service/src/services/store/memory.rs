//! In-process ledger store used when no database is configured, and by the
//! test suite. Same contract as the Postgres store, including the duplicate
//! check on gateway payment id.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

use super::{normalize_vehicle_number, LedgerStore, RecordOutcome, StoreError};
use crate::models::{
    Challan, ChallanStatus, LedgerRecord, LedgerState, OutboxEntry, Payment, PaymentStatus,
    ReceiptRecord, Vehicle, PAYMENT_METHOD_RAZORPAY,
};

#[derive(Default)]
struct State {
    vehicles: Vec<Vehicle>,
    challans: HashMap<Uuid, Challan>,
    payments: Vec<Payment>,
    receipts: Vec<ReceiptRecord>,
    outbox: Vec<OutboxEntry>,
}

impl State {
    fn with_payment(&self, mut receipt: ReceiptRecord) -> ReceiptRecord {
        if let Some(payment) = receipt
            .payment_id
            .and_then(|id| self.payments.iter().find(|p| p.id == id))
        {
            receipt.gateway_order_id = Some(payment.gateway_order_id.clone());
            receipt.subtotal = Some(payment.subtotal);
            receipt.convenience_fee = Some(payment.convenience_fee);
            receipt.state = Some(payment.state.clone());
        }
        receipt
    }

    fn mark_paid(&mut self, challan_ids: &[Uuid]) -> u64 {
        let now = Utc::now();
        let mut updated = 0;
        for id in challan_ids {
            if let Some(challan) = self.challans.get_mut(id) {
                challan.status = ChallanStatus::Paid.as_str().to_string();
                challan.updated_at = now;
                updated += 1;
            }
        }
        updated
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
    fail_outbox: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with three demo vehicles and their challans.
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        for (number, vehicle_type, owner, challans) in demo_vehicles() {
            let vehicle = match store.insert_vehicle(number, vehicle_type, Some(owner)) {
                Ok(vehicle) => vehicle,
                Err(e) => {
                    warn!(vehicle_number = number, error = %e, "Skipping demo vehicle");
                    continue;
                }
            };
            for seed in challans {
                let challan_number = seed.challan_number;
                if let Err(e) = store.insert_challan(vehicle.id, seed) {
                    warn!(challan_number, error = %e, "Skipping demo challan");
                }
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    pub fn insert_vehicle(
        &self,
        vehicle_number: &str,
        vehicle_type: &str,
        owner_name: Option<&str>,
    ) -> Result<Vehicle, StoreError> {
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            vehicle_number: vehicle_number.to_string(),
            vehicle_type: vehicle_type.to_string(),
            owner_name: owner_name.map(str::to_string),
            image_url: None,
        };
        self.lock()?.vehicles.push(vehicle.clone());
        Ok(vehicle)
    }

    pub fn insert_challan(&self, vehicle_id: Uuid, seed: ChallanSeed) -> Result<Challan, StoreError> {
        self.insert_challan_with_id(Uuid::new_v4(), vehicle_id, seed)
    }

    pub fn insert_challan_with_id(
        &self,
        id: Uuid,
        vehicle_id: Uuid,
        seed: ChallanSeed,
    ) -> Result<Challan, StoreError> {
        let challan = Challan {
            id,
            vehicle_id,
            challan_number: seed.challan_number.to_string(),
            violation_type: seed.violation_type.to_string(),
            description: seed.description.map(str::to_string),
            amount: seed.amount,
            status: seed.status.as_str().to_string(),
            fine_date: seed.fine_date,
            fine_time: seed.fine_time,
            location: seed.location.map(str::to_string),
            proof_image_url: None,
            updated_at: Utc::now(),
        };
        self.lock()?.challans.insert(challan.id, challan.clone());
        Ok(challan)
    }

    pub fn challan(&self, id: Uuid) -> Option<Challan> {
        self.lock().ok()?.challans.get(&id).cloned()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.lock().map(|s| s.payments.clone()).unwrap_or_default()
    }

    pub fn outbox(&self) -> Vec<OutboxEntry> {
        self.lock().map(|s| s.outbox.clone()).unwrap_or_default()
    }

    /// Make `record_payment` fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every outbox write fail until switched off again.
    pub fn fail_outbox_writes(&self, fail: bool) {
        self.fail_outbox.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn record_payment(&self, record: &LedgerRecord) -> Result<RecordOutcome, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger writes disabled".to_string()));
        }

        let details = record.details();
        let challan_ids = record.challan_ids();
        let mut state = self.lock()?;

        let duplicate = state
            .payments
            .iter()
            .any(|p| p.gateway_payment_id == details.gateway_payment_id)
            || state
                .receipts
                .iter()
                .any(|r| r.gateway_payment_id == details.gateway_payment_id);
        if duplicate {
            return Err(StoreError::DuplicatePayment(
                details.gateway_payment_id.clone(),
            ));
        }

        let recorded = record.payment.state().advance(LedgerState::Recorded)?;
        let payment_id = Uuid::new_v4();
        let updated = state.mark_paid(&challan_ids);
        let ledger_state = recorded.after_challan_update(challan_ids.len(), updated)?;

        state.payments.push(Payment {
            id: payment_id,
            vehicle_number: details.vehicle_number.clone(),
            challan_ids: challan_ids.clone(),
            subtotal: details.subtotal,
            convenience_fee: details.convenience_fee,
            total_amount: details.total_amount,
            payment_method: PAYMENT_METHOD_RAZORPAY.to_string(),
            gateway_order_id: details.gateway_order_id.clone(),
            gateway_payment_id: details.gateway_payment_id.clone(),
            gateway_signature: details.gateway_signature.clone(),
            status: PaymentStatus::Success.as_str().to_string(),
            state: ledger_state.as_str().to_string(),
            paid_at: record.paid_at,
            created_at: Utc::now(),
            reconcile_attempts: 0,
            last_reconcile_at: None,
        });
        state.receipts.push(ReceiptRecord {
            id: Uuid::new_v4(),
            receipt_number: record.receipt_number.clone(),
            payment_id: Some(payment_id),
            gateway_payment_id: details.gateway_payment_id.clone(),
            vehicle_number: details.vehicle_number.clone(),
            user_email: details.user_email.clone(),
            challan_details: Json(details.challans.clone()),
            amount_paid: details.total_amount,
            payment_date: record.paid_at,
            email_sent: false,
            sms_sent: false,
            gateway_order_id: None,
            subtotal: None,
            convenience_fee: None,
            state: None,
        });

        Ok(RecordOutcome {
            payment_id,
            state: ledger_state,
            challans_requested: challan_ids.len(),
            challans_updated: updated,
        })
    }

    async fn mark_challans_paid(&self, challan_ids: &[Uuid]) -> Result<u64, StoreError> {
        Ok(self.lock()?.mark_paid(challan_ids))
    }

    async fn find_receipt_by_number(
        &self,
        receipt_number: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .receipts
            .iter()
            .find(|r| r.receipt_number == receipt_number)
            .cloned()
            .map(|r| state.with_payment(r)))
    }

    async fn find_receipt_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<ReceiptRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .receipts
            .iter()
            .find(|r| r.gateway_payment_id == gateway_payment_id)
            .cloned()
            .map(|r| state.with_payment(r)))
    }

    async fn list_receipts_by_email(&self, email: &str) -> Result<Vec<ReceiptRecord>, StoreError> {
        let state = self.lock()?;
        let mut receipts: Vec<ReceiptRecord> = state
            .receipts
            .iter()
            .filter(|r| r.user_email.as_deref() == Some(email))
            .cloned()
            .map(|r| state.with_payment(r))
            .collect();
        receipts.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        Ok(receipts)
    }

    async fn list_unreconciled_payments(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<Payment>, StoreError> {
        let state = self.lock()?;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.parsed_state() == Some(LedgerState::Recorded))
            .filter(|p| p.reconcile_attempts < max_attempts)
            .cloned()
            .collect();
        // `None` sorts first, matching NULLS FIRST.
        payments.sort_by_key(|p| (p.last_reconcile_at, p.created_at));
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn record_reconcile_attempt(&self, payment_id: Uuid) -> Result<i32, StoreError> {
        let mut state = self.lock()?;
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::Unavailable(format!("payment {} not found", payment_id)))?;
        payment.reconcile_attempts += 1;
        payment.last_reconcile_at = Some(Utc::now());
        Ok(payment.reconcile_attempts)
    }

    async fn promote_reconciled(&self, payment_id: Uuid) -> Result<(), StoreError> {
        let from = LedgerState::Recorded;
        let to = from.advance(LedgerState::Reconciled)?;
        let mut state = self.lock()?;
        if let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.parsed_state() == Some(from))
        {
            payment.state = to.as_str().to_string();
        }
        Ok(())
    }

    async fn enqueue_outbox(
        &self,
        record: &LedgerRecord,
        error: &str,
    ) -> Result<LedgerRecord, StoreError> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("outbox writes disabled".to_string()));
        }

        let gateway_payment_id = &record.details().gateway_payment_id;
        let mut state = self.lock()?;
        if let Some(entry) = state
            .outbox
            .iter_mut()
            .find(|e| &e.gateway_payment_id == gateway_payment_id)
        {
            entry.last_error = Some(error.to_string());
            return Ok(entry.record().clone());
        }
        state.outbox.push(OutboxEntry {
            id: Uuid::new_v4(),
            gateway_payment_id: gateway_payment_id.clone(),
            payload: Json(record.clone()),
            attempts: 0,
            last_error: Some(error.to_string()),
            created_at: Utc::now(),
            processed_at: None,
        });
        Ok(record.clone())
    }

    async fn find_outbox_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<OutboxEntry>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .outbox
            .iter()
            .find(|e| e.gateway_payment_id == gateway_payment_id)
            .cloned())
    }

    async fn pending_outbox(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let state = self.lock()?;
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .iter()
            .filter(|e| e.is_pending() && e.attempts < max_attempts)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.attempts, e.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn complete_outbox(&self, id: Uuid) -> Result<(), StoreError> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("outbox writes disabled".to_string()));
        }
        let mut state = self.lock()?;
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == id) {
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_outbox(&self, id: Uuid, error: &str) -> Result<i32, StoreError> {
        if self.fail_outbox.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("outbox writes disabled".to_string()));
        }
        let mut state = self.lock()?;
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Unavailable(format!("outbox entry {} not found", id)))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        Ok(entry.attempts)
    }

    async fn find_vehicle(&self, normalized: &str) -> Result<Option<Vehicle>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .vehicles
            .iter()
            .find(|v| normalize_vehicle_number(&v.vehicle_number) == normalized)
            .cloned())
    }

    async fn list_challans_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<Challan>, StoreError> {
        let state = self.lock()?;
        let mut challans: Vec<Challan> = state
            .challans
            .values()
            .filter(|c| c.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        challans.sort_by(|a, b| (b.fine_date, b.fine_time).cmp(&(a.fine_date, a.fine_time)));
        Ok(challans)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

/// Fields needed to seed one challan.
#[derive(Debug, Clone)]
pub struct ChallanSeed {
    pub challan_number: &'static str,
    pub violation_type: &'static str,
    pub description: Option<&'static str>,
    pub amount: Decimal,
    pub status: ChallanStatus,
    pub fine_date: Option<NaiveDate>,
    pub fine_time: Option<NaiveTime>,
    pub location: Option<&'static str>,
}

impl ChallanSeed {
    #[allow(clippy::too_many_arguments)]
    fn demo(
        challan_number: &'static str,
        violation_type: &'static str,
        description: &'static str,
        amount: i64,
        status: ChallanStatus,
        date: (i32, u32, u32),
        time: (u32, u32),
        location: &'static str,
    ) -> Self {
        Self {
            challan_number,
            violation_type,
            description: Some(description),
            amount: Decimal::from(amount),
            status,
            fine_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            fine_time: NaiveTime::from_hms_opt(time.0, time.1, 0),
            location: Some(location),
        }
    }
}

type DemoVehicle = (&'static str, &'static str, &'static str, Vec<ChallanSeed>);

fn demo_vehicles() -> Vec<DemoVehicle> {
    use ChallanStatus::{Overdue, Pending};
    vec![
        (
            "MH-12-AB-1234",
            "Car",
            "Rahul Kumar",
            vec![
                ChallanSeed::demo(
                    "CH-2023-89210",
                    "Overspeeding",
                    "Overspeeding (80km/h in 60 zone)",
                    1000,
                    Overdue,
                    (2023, 10, 12),
                    (14, 30),
                    "Mumbai-Pune Expressway, km 42",
                ),
                ChallanSeed::demo(
                    "CH-2023-99102",
                    "Signal Jump",
                    "Signal Jump",
                    500,
                    Pending,
                    (2023, 10, 15),
                    (9, 15),
                    "MG Road Signal, Pune",
                ),
                ChallanSeed::demo(
                    "CH-2023-11202",
                    "No Parking",
                    "No Parking Zone",
                    500,
                    Pending,
                    (2023, 10, 18),
                    (11, 0),
                    "FC Road, Near Starbucks",
                ),
            ],
        ),
        (
            "KA-01-MJ-2023",
            "Car",
            "Amit Singh",
            vec![ChallanSeed::demo(
                "CH-2023-45678",
                "Helmet Violation",
                "Riding without helmet",
                1000,
                Pending,
                (2023, 10, 20),
                (16, 45),
                "Brigade Road, Bangalore",
            )],
        ),
        (
            "DL-05-CX-4567",
            "Bike",
            "Priya Mehta",
            vec![ChallanSeed::demo(
                "CH-2023-98765",
                "Wrong Side Driving",
                "Driving on wrong side of road",
                2000,
                Overdue,
                (2023, 10, 5),
                (8, 30),
                "Connaught Place, Delhi",
            )],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_receipt_number, paid_at_now, PaymentDetails, VerifiedPayment};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn record_for(payment_id: &str, challan_ids: &[Uuid]) -> LedgerRecord {
        let challans = challan_ids
            .iter()
            .map(|id| serde_json::from_value(json!({"dbId": id, "amount": 500})).unwrap())
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
                convenience_fee: dec!(10),
                total_amount: dec!(510),
                user_email: Some("a@example.com".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn record_marks_challans_and_reconciles() {
        let store = InMemoryStore::with_demo_data();
        let vehicle = store.find_vehicle("MH12AB1234").await.unwrap().unwrap();
        let challans = store.list_challans_for_vehicle(vehicle.id).await.unwrap();
        assert_eq!(challans.len(), 3);
        assert_eq!(challans[0].challan_number, "CH-2023-11202");

        let outcome = store
            .record_payment(&record_for("pay_1", &[challans[0].id]))
            .await
            .unwrap();

        assert_eq!(outcome.state, LedgerState::Reconciled);
        assert_eq!(outcome.challans_updated, 1);
        assert_eq!(
            store.challan(challans[0].id).unwrap().parsed_status(),
            Some(ChallanStatus::Paid)
        );
    }

    #[tokio::test]
    async fn second_write_for_same_payment_is_rejected() {
        let store = InMemoryStore::new();
        store.record_payment(&record_for("pay_1", &[])).await.unwrap();

        let err = store
            .record_payment(&record_for("pay_1", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePayment(id) if id == "pay_1"));
        assert_eq!(store.payments().len(), 1);
    }

    #[tokio::test]
    async fn unknown_challan_leaves_payment_recorded() {
        let store = InMemoryStore::new();
        let outcome = store
            .record_payment(&record_for("pay_1", &[Uuid::new_v4()]))
            .await
            .unwrap();
        assert_eq!(outcome.state, LedgerState::Recorded);
        assert_eq!(store.list_unreconciled_payments(10, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn receipt_lookup_carries_payment_breakdown() {
        let store = InMemoryStore::new();
        let record = record_for("pay_1", &[]);
        store.record_payment(&record).await.unwrap();

        let found = store
            .find_receipt_by_number(&record.receipt_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.gateway_order_id.as_deref(), Some("order_1"));
        assert_eq!(found.subtotal, Some(dec!(500)));
        assert_eq!(found.state.as_deref(), Some("RECONCILED"));
    }

    #[tokio::test]
    async fn outbox_keeps_first_record_for_same_payment() {
        let store = InMemoryStore::new();
        let first = record_for("pay_1", &[]);
        let second = record_for("pay_1", &[]);
        assert_ne!(first.receipt_number, second.receipt_number);

        let parked = store.enqueue_outbox(&first, "boom").await.unwrap();
        assert_eq!(parked.receipt_number, first.receipt_number);
        let parked = store.enqueue_outbox(&second, "boom again").await.unwrap();
        assert_eq!(parked.receipt_number, first.receipt_number);

        let pending = store.pending_outbox(10, 5).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("boom again"));

        assert_eq!(store.fail_outbox(pending[0].id, "still down").await.unwrap(), 1);
        store.complete_outbox(pending[0].id).await.unwrap();
        assert!(store.pending_outbox(10, 5).await.unwrap().is_empty());
        assert_eq!(store.outbox()[0].attempts, 1);
    }

    #[tokio::test]
    async fn outbox_skips_entries_at_attempt_cap() {
        let store = InMemoryStore::new();
        store.enqueue_outbox(&record_for("pay_stuck", &[]), "boom").await.unwrap();
        store.enqueue_outbox(&record_for("pay_fresh", &[]), "boom").await.unwrap();

        let stuck = store
            .find_outbox_by_gateway_payment_id("pay_stuck")
            .await
            .unwrap()
            .unwrap();
        store.fail_outbox(stuck.id, "down").await.unwrap();
        assert_eq!(store.fail_outbox(stuck.id, "down").await.unwrap(), 2);

        let pending = store.pending_outbox(1, 5).await.unwrap();
        assert_eq!(pending[0].gateway_payment_id, "pay_fresh");

        let pending = store.pending_outbox(10, 2).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].gateway_payment_id, "pay_fresh");
    }

    #[tokio::test]
    async fn swept_payments_rotate_behind_fresh_ones() {
        let store = InMemoryStore::new();
        store
            .record_payment(&record_for("pay_old", &[Uuid::new_v4()]))
            .await
            .unwrap();
        store
            .record_payment(&record_for("pay_new", &[Uuid::new_v4()]))
            .await
            .unwrap();

        let first = store.list_unreconciled_payments(1, 3).await.unwrap();
        assert_eq!(first[0].gateway_payment_id, "pay_old");
        assert_eq!(store.record_reconcile_attempt(first[0].id).await.unwrap(), 1);

        let next = store.list_unreconciled_payments(1, 3).await.unwrap();
        assert_eq!(next[0].gateway_payment_id, "pay_new");

        let old_id = first[0].id;
        store.record_reconcile_attempt(old_id).await.unwrap();
        store.record_reconcile_attempt(old_id).await.unwrap();
        let remaining = store.list_unreconciled_payments(10, 3).await.unwrap();
        assert!(remaining.iter().all(|p| p.id != old_id));
    }

    #[tokio::test]
    async fn injected_write_failure() {
        let store = InMemoryStore::new();
        store.fail_writes(true);
        assert!(matches!(
            store.record_payment(&record_for("pay_1", &[])).await,
            Err(StoreError::Unavailable(_))
        ));
        store.fail_writes(false);
        assert!(store.record_payment(&record_for("pay_1", &[])).await.is_ok());
    }
}
