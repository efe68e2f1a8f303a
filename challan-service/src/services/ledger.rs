//! Order initiation, payment verification and receipt queries.

use challan_core::error::AppError;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::metrics;
use super::razorpay::RazorpayClient;
use super::store::{LedgerStore, RecordOutcome, StoreError};
use crate::dtos::{CreateOrderRequest, CreateOrderResponse, OrderResponse};
use crate::models::{
    challan_references, new_order_label, new_receipt_number, paid_at_now, to_minor_units,
    LedgerRecord, LedgerState, PaymentDetails, ReceiptView,
};

pub const ORDER_CURRENCY: &str = "INR";

/// Why a verify call returned a receipt without writing a new ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Recorded(LedgerState),
    Duplicate,
    Deferred,
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    razorpay: RazorpayClient,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, razorpay: RazorpayClient) -> Self {
        Self { store, razorpay }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    #[instrument(skip(self, req), fields(vehicle_number = ?req.vehicle_number))]
    pub async fn create_order(
        &self,
        req: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, AppError> {
        let amount = req
            .amount
            .filter(|a| *a > Decimal::ZERO)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid amount")))?;
        let minor = to_minor_units(amount)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid amount")))?;

        let label = new_order_label();
        let notes = json!({
            "vehicleNumber": req.vehicle_number.unwrap_or_default(),
            "challanIds": challan_references(&req.challans),
            "userEmail": req.user_email.unwrap_or_default(),
        });

        let order = self
            .razorpay
            .create_order(minor, ORDER_CURRENCY, &label, notes)
            .await
            .map_err(|e| {
                error!(error = %e, receipt = %label, "Order creation failed");
                metrics::record_order("failed");
                AppError::BadGateway("Failed to create order".to_string())
            })?;

        metrics::record_order("created");

        Ok(CreateOrderResponse {
            success: true,
            order: OrderResponse {
                id: order.id,
                amount: order.amount,
                currency: order.currency,
                receipt: order.receipt.unwrap_or(label),
            },
            key: self.razorpay.key_id().to_string(),
        })
    }

    /// Verify a checkout callback and record it in the ledger.
    ///
    /// Once the signature checks out the gateway has captured the money, so
    /// storage failures never reach the caller: the payment is parked in the
    /// outbox and the receipt is still returned.
    #[instrument(skip(self, details), fields(gateway_payment_id = %details.gateway_payment_id))]
    pub async fn verify_and_record(
        &self,
        details: PaymentDetails,
    ) -> Result<(ReceiptView, VerifyOutcome), AppError> {
        let verified = match self.razorpay.verify_payment_signature(details) {
            Ok(v) => v,
            Err(e) => {
                metrics::record_verification("rejected");
                return Err(e);
            }
        };

        let gateway_payment_id = verified.details().gateway_payment_id.clone();

        match self
            .store
            .find_receipt_by_gateway_payment_id(&gateway_payment_id)
            .await
        {
            Ok(Some(existing)) => {
                info!(duplicate = true, receipt_number = %existing.receipt_number, "Payment already recorded");
                metrics::record_verification("duplicate");
                return Ok((ReceiptView::from(existing), VerifyOutcome::Duplicate));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Idempotency lookup failed, attempting write"),
        }

        metrics::record_verification("verified");

        // A payment parked by an earlier attempt already has a receipt number
        // in the customer's hands. Reuse it rather than minting another.
        let parked = match self
            .store
            .find_outbox_by_gateway_payment_id(&gateway_payment_id)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Outbox lookup failed, attempting write");
                None
            }
        };

        let (record, parked_id) = match parked {
            Some(entry) => {
                info!(receipt_number = %entry.record().receipt_number, "Resuming parked payment");
                (entry.record().clone(), Some(entry.id))
            }
            None => (
                LedgerRecord {
                    receipt_number: new_receipt_number(),
                    paid_at: paid_at_now(),
                    payment: verified,
                },
                None,
            ),
        };

        match self.store.record_payment(&record).await {
            Ok(outcome) => {
                observe_outcome(&outcome);
                if let Some(id) = parked_id {
                    match self.store.complete_outbox(id).await {
                        Ok(()) => metrics::record_outbox("replayed"),
                        Err(e) => warn!(error = %e, "Failed to close outbox entry"),
                    }
                }
                Ok((ReceiptView::from(&record), VerifyOutcome::Recorded(outcome.state)))
            }
            Err(StoreError::DuplicatePayment(_)) => {
                metrics::record_verification("duplicate");
                self.resolve_duplicate(&gateway_payment_id)
                    .await
                    .map(|view| (view, VerifyOutcome::Duplicate))
            }
            Err(e) => {
                let parked = self.defer(&record, &e).await;
                Ok((ReceiptView::from(&parked), VerifyOutcome::Deferred))
            }
        }
    }

    /// Receipt for a payment another request already wrote. Falls back to the
    /// parked record so the caller never sees a receipt number the ledger
    /// does not know.
    async fn resolve_duplicate(&self, gateway_payment_id: &str) -> Result<ReceiptView, AppError> {
        match self
            .store
            .find_receipt_by_gateway_payment_id(gateway_payment_id)
            .await
        {
            Ok(Some(existing)) => return Ok(ReceiptView::from(existing)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Receipt lookup after duplicate failed"),
        }
        match self
            .store
            .find_outbox_by_gateway_payment_id(gateway_payment_id)
            .await
        {
            Ok(Some(entry)) => Ok(ReceiptView::from(entry.record())),
            Ok(None) => {
                error!("Duplicate payment has neither receipt nor outbox entry");
                Err(AppError::ServiceUnavailable)
            }
            Err(e) => {
                error!(error = %e, "Outbox lookup after duplicate failed");
                Err(AppError::ServiceUnavailable)
            }
        }
    }

    /// Park the record in the outbox. Returns the record actually parked,
    /// which is an earlier one when this payment was already queued.
    async fn defer(&self, record: &LedgerRecord, cause: &StoreError) -> LedgerRecord {
        let reason = cause.to_string();
        match self.store.enqueue_outbox(record, &reason).await {
            Ok(parked) => {
                warn!(
                    error = %reason,
                    receipt_number = %parked.receipt_number,
                    "Ledger write failed, payment queued for reconciliation"
                );
                metrics::record_ledger_write("outboxed");
                metrics::record_outbox("enqueued");
                parked
            }
            Err(outbox_err) => {
                let payload = serde_json::to_string(record).unwrap_or_default();
                error!(
                    error = %reason,
                    outbox_error = %outbox_err,
                    payload = %payload,
                    "Captured payment could not be recorded or queued"
                );
                metrics::record_ledger_write("lost");
                record.clone()
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_receipt(&self, receipt_number: &str) -> Result<ReceiptView, AppError> {
        self.store
            .find_receipt_by_number(receipt_number)
            .await?
            .map(ReceiptView::from)
            .ok_or_else(receipt_not_found)
    }

    #[instrument(skip(self))]
    pub async fn get_receipt_by_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<ReceiptView, AppError> {
        self.store
            .find_receipt_by_gateway_payment_id(gateway_payment_id)
            .await?
            .map(ReceiptView::from)
            .ok_or_else(receipt_not_found)
    }

    #[instrument(skip(self, email))]
    pub async fn list_user_receipts(&self, email: &str) -> Result<Vec<ReceiptView>, AppError> {
        let receipts = self.store.list_receipts_by_email(email).await?;
        Ok(receipts.into_iter().map(ReceiptView::from).collect())
    }
}

fn receipt_not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Receipt not found"))
}

/// Metrics and logs shared by the request path and the reconciler.
pub(crate) fn observe_outcome(outcome: &RecordOutcome) {
    metrics::record_challans_paid(outcome.challans_updated);
    match outcome.state {
        LedgerState::Reconciled => metrics::record_ledger_write("reconciled"),
        _ => {
            metrics::record_ledger_write("recorded");
            metrics::record_challan_mismatch();
            warn!(
                payment_id = %outcome.payment_id,
                requested = outcome.challans_requested,
                updated = outcome.challans_updated,
                "Challan update matched fewer rows than requested"
            );
        }
    }
}
