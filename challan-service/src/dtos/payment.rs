use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{ChallanLineItem, PaymentDetails, ReceiptView};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Rupees. Checked for presence and sign by the service.
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub vehicle_number: Option<String>,
    #[serde(default)]
    pub challans: Vec<ChallanLineItem>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order: OrderResponse,
    /// Public Razorpay key id for the checkout widget.
    pub key: String,
}

/// Checkout callback. Gateway fields keep Razorpay's snake_case names.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(rename = "razorpay_order_id", default)]
    #[validate(length(min = 1, max = 64, message = "razorpay_order_id must be 1-64 characters"))]
    pub razorpay_order_id: String,
    #[serde(rename = "razorpay_payment_id", default)]
    #[validate(length(min = 1, max = 64, message = "razorpay_payment_id must be 1-64 characters"))]
    pub razorpay_payment_id: String,
    #[serde(rename = "razorpay_signature", default)]
    #[validate(length(min = 1, max = 128, message = "razorpay_signature must be 1-128 characters"))]
    pub razorpay_signature: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 32, message = "vehicleNumber must be 1-32 characters"))]
    pub vehicle_number: String,
    #[serde(default)]
    pub challans: Vec<ChallanLineItem>,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub convenience_fee: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    #[validate(length(max = 255, message = "userEmail must be at most 255 characters"))]
    pub user_email: Option<String>,
}

impl From<VerifyPaymentRequest> for PaymentDetails {
    fn from(req: VerifyPaymentRequest) -> Self {
        Self {
            gateway_order_id: req.razorpay_order_id,
            gateway_payment_id: req.razorpay_payment_id,
            gateway_signature: req.razorpay_signature,
            vehicle_number: req.vehicle_number,
            challans: req.challans,
            subtotal: req.subtotal,
            convenience_fee: req.convenience_fee,
            total_amount: req.total_amount,
            user_email: req.user_email.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
    pub receipt: ReceiptView,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub success: bool,
    pub receipt: ReceiptView,
}

#[derive(Debug, Serialize)]
pub struct ReceiptListResponse {
    pub success: bool,
    pub receipts: Vec<ReceiptView>,
}

#[derive(Debug, Deserialize)]
pub struct UserReceiptsQuery {
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_request_mixes_gateway_and_camel_case_fields() {
        let req: VerifyPaymentRequest = serde_json::from_value(json!({
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": "abc",
            "vehicleNumber": "MH12AB1234",
            "challans": [{"id": "CH-1", "amount": 500}],
            "subtotal": 500,
            "convenienceFee": 10.5,
            "totalAmount": 510.5,
            "userEmail": ""
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let details = PaymentDetails::from(req);
        assert_eq!(details.gateway_payment_id, "pay_1");
        assert_eq!(details.total_amount, Decimal::new(5105, 1));
        assert_eq!(details.user_email, None);
    }

    #[test]
    fn missing_gateway_fields_fail_validation() {
        let req: VerifyPaymentRequest = serde_json::from_value(json!({
            "vehicleNumber": "MH12AB1234",
            "totalAmount": 510
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("razorpay_signature"));
    }

    #[test]
    fn values_wider_than_ledger_columns_fail_validation() {
        let req: VerifyPaymentRequest = serde_json::from_value(json!({
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": "abc",
            "vehicleNumber": "M".repeat(33),
            "totalAmount": 510,
            "userEmail": format!("{}@example.com", "a".repeat(250))
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("vehicle_number"));
        assert!(fields.contains_key("user_email"));
        assert!(!fields.contains_key("razorpay_payment_id"));
    }
}
