//! Receipts: stored rows, the public view, and reference number minting.

use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::challan::ChallanLineItem;
use super::money::{serialize_decimal, serialize_opt_decimal};
use super::payment::LedgerRecord;

pub const RECEIPT_PREFIX: &str = "RCPT";
pub const ORDER_LABEL_PREFIX: &str = "ORD";
pub const RECEIPT_STATUS_PAID: &str = "PAID";

const SUFFIX_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SUFFIX_LEN: usize = 9;

/// `<prefix>-<unix millis>-<9 uppercase base36 chars>`.
fn mint_reference(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// Customer-facing receipt number.
pub fn new_receipt_number() -> String {
    mint_reference(RECEIPT_PREFIX)
}

/// Label passed to the gateway as the order's `receipt` field.
pub fn new_order_label() -> String {
    mint_reference(ORDER_LABEL_PREFIX)
}

/// Server timestamp for a payment, at millisecond precision so the value
/// survives a round trip through the database unchanged.
pub fn paid_at_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Receipt row joined with the owning payment's breakdown.
///
/// The payment columns are optional: a receipt may outlive a missing payment
/// reference.
#[derive(Debug, Clone, FromRow)]
pub struct ReceiptRecord {
    pub id: Uuid,
    pub receipt_number: String,
    pub payment_id: Option<Uuid>,
    pub gateway_payment_id: String,
    pub vehicle_number: String,
    pub user_email: Option<String>,
    pub challan_details: Json<Vec<ChallanLineItem>>,
    pub amount_paid: Decimal,
    pub payment_date: DateTime<Utc>,
    pub email_sent: bool,
    pub sms_sent: bool,
    pub gateway_order_id: Option<String>,
    pub subtotal: Option<Decimal>,
    pub convenience_fee: Option<Decimal>,
    pub state: Option<String>,
}

/// Public receipt shape, identical whether freshly recorded or looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub razorpay_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub razorpay_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub vehicle_number: String,
    pub challans: Vec<ChallanLineItem>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_decimal",
        default
    )]
    pub subtotal: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_decimal",
        default
    )]
    pub convenience_fee: Option<Decimal>,
    #[serde(serialize_with = "serialize_decimal")]
    pub total_amount: Decimal,
    pub status: String,
    pub paid_at: DateTime<Utc>,
}

impl From<&LedgerRecord> for ReceiptView {
    fn from(record: &LedgerRecord) -> Self {
        let details = record.details();
        Self {
            id: record.receipt_number.clone(),
            razorpay_order_id: Some(details.gateway_order_id.clone()),
            razorpay_payment_id: Some(details.gateway_payment_id.clone()),
            user_email: details.user_email.clone(),
            vehicle_number: details.vehicle_number.clone(),
            challans: details.challans.clone(),
            subtotal: Some(details.subtotal),
            convenience_fee: Some(details.convenience_fee),
            total_amount: details.total_amount,
            status: RECEIPT_STATUS_PAID.to_string(),
            paid_at: record.paid_at,
        }
    }
}

impl From<ReceiptRecord> for ReceiptView {
    fn from(record: ReceiptRecord) -> Self {
        Self {
            id: record.receipt_number,
            razorpay_order_id: record.gateway_order_id,
            razorpay_payment_id: Some(record.gateway_payment_id),
            user_email: record.user_email,
            vehicle_number: record.vehicle_number,
            challans: record.challan_details.0,
            subtotal: record.subtotal,
            convenience_fee: record.convenience_fee,
            total_amount: record.amount_paid,
            status: RECEIPT_STATUS_PAID.to_string(),
            paid_at: record.payment_date,
        }
    }
}
