use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::{map_transport_error, read_json, GatewayError, InitiateOutcome, StatusOutcome};
use crate::config::PalmPesaConfig;
use crate::models::PaymentStatus;

/// Collection client for gateway B (PalmPesa). Same shape as Lipwa but a
/// different wire format and a POST-based status endpoint.
#[derive(Clone)]
pub struct PalmPesaClient {
    http: reqwest::Client,
    config: PalmPesaConfig,
}

#[derive(Debug, Serialize)]
struct PayViaMobileRequest<'a> {
    user_id: &'a str,
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    amount: Decimal,
    transaction_id: &'a str,
    address: &'a str,
    postcode: &'a str,
    buyer_uuid: String,
}

#[derive(Debug, Deserialize)]
struct PayViaMobileResponse {
    #[serde(default)]
    success: bool,
    order_id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderStatusRequest<'a> {
    order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct PalmPesaCallback {
    pub order_id: String,
    pub status: String,
}

impl PalmPesaClient {
    pub fn new(config: PalmPesaConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(PalmPesaClient { http, config })
    }

    pub async fn initiate(
        &self,
        phone: &str,
        amount: Decimal,
        client_reference: &str,
        payer_name: &str,
        payer_email: &str,
    ) -> Result<InitiateOutcome, GatewayError> {
        let url = self
            .config
            .base_url
            .join("pay-via-mobile")
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        let request = PayViaMobileRequest {
            user_id: client_reference,
            name: payer_name,
            email: payer_email,
            phone,
            amount,
            transaction_id: client_reference,
            address: "Dar es Salaam",
            postcode: "0000",
            buyer_uuid: Uuid::new_v4().to_string(),
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_token)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: PayViaMobileResponse = read_json(response).await?;

        if body.success {
            let reference = body.order_id.ok_or_else(|| GatewayError::NonJson {
                snippet: "success response without order_id".to_string(),
            })?;
            Ok(InitiateOutcome {
                gateway_reference: reference,
                description: body.message.unwrap_or_else(|| "Accepted".to_string()),
            })
        } else {
            Err(GatewayError::Declined {
                status: 400,
                message: body
                    .message
                    .unwrap_or_else(|| "Payment request was not accepted".to_string()),
            })
        }
    }

    pub async fn order_status(&self, order_id: &str) -> Result<StatusOutcome, GatewayError> {
        let url = self
            .config
            .base_url
            .join("order-status")
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_token)
            .json(&OrderStatusRequest { order_id })
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: OrderStatusResponse = read_json(response).await?;
        Ok(StatusOutcome {
            status: normalize_status(&body.status),
            raw_status: body.status,
        })
    }
}

pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw.to_ascii_lowercase().as_str() {
        "success" | "completed" => PaymentStatus::Success,
        "failed" | "cancelled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_vocabulary_normalizes() {
        assert_eq!(normalize_status("COMPLETED"), PaymentStatus::Success);
        assert_eq!(normalize_status("success"), PaymentStatus::Success);
        assert_eq!(normalize_status("FAILED"), PaymentStatus::Failed);
        assert_eq!(normalize_status("cancelled"), PaymentStatus::Failed);
        assert_eq!(normalize_status("processing"), PaymentStatus::Pending);
    }

    #[test]
    fn declined_initiation_surfaces_gateway_message() {
        let body = r#"{"success": false, "message": "Insufficient float"}"#;
        let parsed: PayViaMobileResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.message.as_deref(), Some("Insufficient float"));
    }
}
