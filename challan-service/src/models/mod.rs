pub mod challan;
pub mod money;
pub mod outbox;
pub mod payment;
pub mod receipt;

pub use challan::{
    challan_references, internal_challan_ids, Challan, ChallanLineItem, ChallanStatus, Vehicle,
};
pub use money::to_minor_units;
pub use outbox::OutboxEntry;
pub use payment::{
    InvalidTransition, LedgerRecord, LedgerState, Payment, PaymentDetails, PaymentStatus,
    VerifiedPayment, PAYMENT_METHOD_RAZORPAY,
};
pub use receipt::{
    new_order_label, new_receipt_number, paid_at_now, ReceiptRecord, ReceiptView,
    RECEIPT_STATUS_PAID,
};
