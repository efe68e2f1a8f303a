//! Payment endpoints: order creation, checkout verification and receipts.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use challan_core::error::AppError;
use challan_core::extract::ValidatedJson;

use crate::dtos::{
    CreateOrderRequest, CreateOrderResponse, ReceiptListResponse, ReceiptResponse,
    UserReceiptsQuery, VerifyPaymentRequest, VerifyPaymentResponse,
};
use crate::models::PaymentDetails;
use crate::startup::AppState;

pub async fn create_order(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, AppError> {
    let response = state.ledger.create_order(req).await?;
    Ok(Json(response))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let (receipt, outcome) = state
        .ledger
        .verify_and_record(PaymentDetails::from(req))
        .await?;

    tracing::info!(receipt_number = %receipt.id, outcome = ?outcome, "Payment verified");

    Ok(Json(VerifyPaymentResponse {
        success: true,
        message: "Payment verified successfully".to_string(),
        receipt,
    }))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    Path(receipt_number): Path<String>,
) -> Result<Json<ReceiptResponse>, AppError> {
    let receipt = state.ledger.get_receipt(&receipt_number).await?;
    Ok(Json(ReceiptResponse {
        success: true,
        receipt,
    }))
}

pub async fn get_receipt_by_payment(
    State(state): State<AppState>,
    Path(gateway_payment_id): Path<String>,
) -> Result<Json<ReceiptResponse>, AppError> {
    let receipt = state
        .ledger
        .get_receipt_by_payment_id(&gateway_payment_id)
        .await?;
    Ok(Json(ReceiptResponse {
        success: true,
        receipt,
    }))
}

pub async fn user_receipts(
    State(state): State<AppState>,
    Query(query): Query<UserReceiptsQuery>,
) -> Result<Json<ReceiptListResponse>, AppError> {
    let email = query
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Email is required")))?;

    let receipts = state.ledger.list_user_receipts(&email).await?;
    Ok(Json(ReceiptListResponse {
        success: true,
        receipts,
    }))
}
