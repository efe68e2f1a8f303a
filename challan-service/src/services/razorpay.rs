//! Razorpay payment gateway client.
//!
//! Creates orders through the Orders API and checks the checkout signature
//! Razorpay returns once the customer has paid.

use crate::config::RazorpayConfig;
use crate::models::{PaymentDetails, VerifiedPayment};
use anyhow::{anyhow, Result};
use challan_core::error::AppError;
use challan_core::utils::verify_hmac_sha256_hex;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in paise.
    pub amount: u64,
    pub currency: String,
    pub receipt: String,
    pub notes: serde_json::Value,
}

/// Order as returned by `POST /orders`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayError {
    pub error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayErrorDetail {
    pub code: String,
    pub description: String,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Public key id handed to the checkout widget.
    pub fn key_id(&self) -> &str {
        &self.config.key_id
    }

    /// Create an order for `amount` paise.
    pub async fn create_order(
        &self,
        amount: u64,
        currency: &str,
        receipt: &str,
        notes: serde_json::Value,
    ) -> Result<RazorpayOrder> {
        if !self.is_configured() {
            return Err(anyhow!("Razorpay credentials not configured"));
        }

        let request = CreateOrderRequest {
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
            notes,
        };

        let url = format!("{}/orders", self.config.api_base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Razorpay create_order response");

        if status.is_success() {
            let order: RazorpayOrder = serde_json::from_str(&body)?;
            tracing::info!(
                order_id = %order.id,
                amount = order.amount,
                currency = %order.currency,
                "Razorpay order created"
            );
            Ok(order)
        } else {
            let error: RazorpayError =
                serde_json::from_str(&body).unwrap_or_else(|_| RazorpayError {
                    error: RazorpayErrorDetail {
                        code: "UNKNOWN".to_string(),
                        description: body.clone(),
                    },
                });
            tracing::error!(
                status = %status,
                code = %error.error.code,
                description = %error.error.description,
                "Razorpay order creation failed"
            );
            Err(anyhow!(
                "Razorpay error: {} - {}",
                error.error.code,
                error.error.description
            ))
        }
    }

    /// Check `HMAC-SHA256(order_id|payment_id)` against the supplied
    /// signature. Fails closed: a missing secret or malformed signature is a
    /// rejection, never a pass.
    pub fn verify_payment_signature(
        &self,
        details: PaymentDetails,
    ) -> Result<VerifiedPayment, AppError> {
        let secret = self.config.key_secret.expose_secret();
        let valid = !secret.is_empty()
            && verify_hmac_sha256_hex(secret, &details.signed_payload(), &details.gateway_signature)
                .unwrap_or(false);

        if valid {
            tracing::info!(
                order_id = %details.gateway_order_id,
                payment_id = %details.gateway_payment_id,
                "Payment signature verified"
            );
            Ok(VerifiedPayment::new(details))
        } else {
            tracing::warn!(
                order_id = %details.gateway_order_id,
                payment_id = %details.gateway_payment_id,
                "Payment signature verification failed"
            );
            Err(AppError::VerificationFailed)
        }
    }
}
