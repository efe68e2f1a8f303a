//! Payment ledger rows and the lifecycle a captured payment moves through.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::challan::{internal_challan_ids, ChallanLineItem};

pub const PAYMENT_METHOD_RAZORPAY: &str = "Razorpay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// Lifecycle of a payment, from gateway order to fully reconciled ledger.
///
/// ```text
/// Requested -> Verified -> Recorded -> Reconciled
/// ```
///
/// `Requested` and `Verified` exist only in memory; `Recorded` and
/// `Reconciled` are persisted on the payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerState {
    Requested,
    Verified,
    Recorded,
    Reconciled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid ledger transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: LedgerState,
    pub to: LedgerState,
}

impl LedgerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Verified => "VERIFIED",
            Self::Recorded => "RECORDED",
            Self::Reconciled => "RECONCILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUESTED" => Some(Self::Requested),
            "VERIFIED" => Some(Self::Verified),
            "RECORDED" => Some(Self::Recorded),
            "RECONCILED" => Some(Self::Reconciled),
            _ => None,
        }
    }

    /// Only single forward steps are allowed. `Verified -> Reconciled` is
    /// not a step: a payment must be recorded before it can reconcile.
    pub fn can_transition_to(self, next: LedgerState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Verified)
                | (Self::Verified, Self::Recorded)
                | (Self::Recorded, Self::Reconciled)
        )
    }

    pub fn advance(self, next: LedgerState) -> Result<LedgerState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// State of a `self` payment after a challan update that matched
    /// `updated` of `requested` rows. A full match advances to
    /// `Reconciled`; anything less leaves the state unchanged.
    pub fn after_challan_update(
        self,
        requested: usize,
        updated: u64,
    ) -> Result<LedgerState, InvalidTransition> {
        if updated >= requested as u64 {
            self.advance(Self::Reconciled)
        } else {
            Ok(self)
        }
    }
}

impl std::fmt::Display for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored payment row. Append-only apart from the `state` promotion.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub vehicle_number: String,
    pub challan_ids: Vec<Uuid>,
    pub subtotal: Decimal,
    pub convenience_fee: Decimal,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
    pub status: String,
    pub state: String,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Sweeps that left the payment in `Recorded`.
    pub reconcile_attempts: i32,
    pub last_reconcile_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn parsed_state(&self) -> Option<LedgerState> {
        LedgerState::parse(&self.state)
    }
}

/// Everything a client submits about a completed checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
    pub vehicle_number: String,
    pub challans: Vec<ChallanLineItem>,
    pub subtotal: Decimal,
    pub convenience_fee: Decimal,
    pub total_amount: Decimal,
    pub user_email: Option<String>,
}

impl PaymentDetails {
    /// `order_id|payment_id`, the string the gateway signs.
    pub fn signed_payload(&self) -> String {
        format!("{}|{}", self.gateway_order_id, self.gateway_payment_id)
    }
}

/// Payment details whose gateway signature has been checked.
///
/// Only the signature verifier constructs this, so nothing downstream can
/// write a ledger row for an unverified callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedPayment {
    details: PaymentDetails,
}

impl VerifiedPayment {
    pub(crate) fn new(details: PaymentDetails) -> Self {
        Self { details }
    }

    pub fn details(&self) -> &PaymentDetails {
        &self.details
    }

    pub fn state(&self) -> LedgerState {
        LedgerState::Verified
    }
}

/// What the ledger writes for one verified payment: the payment itself plus
/// the receipt number and timestamp minted for it. Also the outbox payload,
/// so a deferred write reuses the receipt number the customer already has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub receipt_number: String,
    pub paid_at: DateTime<Utc>,
    pub payment: VerifiedPayment,
}

impl LedgerRecord {
    pub fn details(&self) -> &PaymentDetails {
        self.payment.details()
    }

    pub fn challan_ids(&self) -> Vec<Uuid> {
        internal_challan_ids(&self.details().challans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_steps_only() {
        use LedgerState::*;
        assert_eq!(Requested.advance(Verified), Ok(Verified));
        assert_eq!(Verified.advance(Recorded), Ok(Recorded));
        assert_eq!(Recorded.advance(Reconciled), Ok(Reconciled));

        assert!(Verified.advance(Reconciled).is_err());
        assert!(Recorded.advance(Requested).is_err());
        assert!(Reconciled.advance(Recorded).is_err());
        assert!(Requested.advance(Recorded).is_err());
    }

    #[test]
    fn challan_update_decides_state() {
        use LedgerState::*;
        assert_eq!(Recorded.after_challan_update(0, 0), Ok(Reconciled));
        assert_eq!(Recorded.after_challan_update(2, 2), Ok(Reconciled));
        assert_eq!(Recorded.after_challan_update(2, 1), Ok(Recorded));
        assert_eq!(Recorded.after_challan_update(3, 0), Ok(Recorded));
    }

    #[test]
    fn challan_update_cannot_skip_recording() {
        use LedgerState::*;
        assert!(Verified.after_challan_update(1, 1).is_err());
        assert!(Reconciled.after_challan_update(1, 1).is_err());
    }

    #[test]
    fn verified_payment_records_next() {
        let details = PaymentDetails {
            gateway_order_id: "order_1".to_string(),
            gateway_payment_id: "pay_1".to_string(),
            gateway_signature: "sig".to_string(),
            vehicle_number: "MH12AB1234".to_string(),
            challans: vec![],
            subtotal: Decimal::ZERO,
            convenience_fee: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            user_email: None,
        };
        let verified = VerifiedPayment::new(details);
        assert_eq!(verified.state().advance(LedgerState::Recorded), Ok(LedgerState::Recorded));
    }

    #[test]
    fn state_text_round_trip() {
        for state in [
            LedgerState::Requested,
            LedgerState::Verified,
            LedgerState::Recorded,
            LedgerState::Reconciled,
        ] {
            assert_eq!(LedgerState::parse(state.as_str()), Some(state));
        }
    }
}
