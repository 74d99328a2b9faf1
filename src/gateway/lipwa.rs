use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{map_transport_error, read_json, snippet, GatewayError, InitiateOutcome, StatusOutcome};
use crate::config::LipwaConfig;
use crate::models::PaymentStatus;

/// STK-push collection client for gateway A. The user gets a PIN prompt on
/// their handset; the final outcome arrives by poll or callback.
#[derive(Clone)]
pub struct LipwaClient {
    http: reqwest::Client,
    config: LipwaConfig,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    amount: Decimal,
    phone_number: &'a str,
    channel_id: &'a str,
    callback_url: &'a str,
    api_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: i32,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// Asynchronous server-to-server callback body; same status vocabulary as
/// the poll endpoint.
#[derive(Debug, Deserialize)]
pub struct LipwaCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub status: String,
    pub api_ref: Option<String>,
}

impl LipwaClient {
    pub fn new(config: LipwaConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(LipwaClient { http, config })
    }

    /// Pushes a payment prompt to the given phone. The phone must already be
    /// validated by the caller; no network call happens on bad input.
    pub async fn initiate(
        &self,
        phone: &str,
        amount: Decimal,
        client_reference: &str,
    ) -> Result<InitiateOutcome, GatewayError> {
        let url = self
            .config
            .base_url
            .join("payments")
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        let request = PushRequest {
            amount,
            phone_number: phone,
            channel_id: &self.config.channel_id,
            callback_url: &self.config.callback_url,
            api_ref: client_reference,
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: PushResponse = read_json(response).await?;

        if body.response_code == 0 {
            let reference = body.checkout_request_id.ok_or_else(|| GatewayError::NonJson {
                snippet: "ResponseCode 0 without CheckoutRequestID".to_string(),
            })?;
            Ok(InitiateOutcome {
                gateway_reference: reference,
                description: body
                    .response_description
                    .unwrap_or_else(|| "Accepted".to_string()),
            })
        } else {
            Err(GatewayError::Declined {
                status: 400,
                message: snippet(
                    &body
                        .response_description
                        .unwrap_or_else(|| format!("ResponseCode {}", body.response_code)),
                ),
            })
        }
    }

    pub async fn status(&self, gateway_reference: &str) -> Result<StatusOutcome, GatewayError> {
        let mut url = self
            .config
            .base_url
            .join("status")
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        url.query_pairs_mut().append_pair("ref", gateway_reference);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: StatusResponse = read_json(response).await?;
        Ok(StatusOutcome {
            status: normalize_status(&body.status),
            raw_status: body.status,
        })
    }
}

/// `payment.failed` covers both user cancellation and failure upstream; the
/// raw string travels with the normalized value so callers can still tell
/// them apart if the gateway ever starts distinguishing.
pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "payment.success" => PaymentStatus::Success,
        "payment.failed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_maps_to_three_states() {
        assert_eq!(normalize_status("payment.success"), PaymentStatus::Success);
        assert_eq!(normalize_status("payment.failed"), PaymentStatus::Failed);
        assert_eq!(normalize_status("payment.pending"), PaymentStatus::Pending);
        assert_eq!(normalize_status("anything-else"), PaymentStatus::Pending);
    }

    #[test]
    fn push_response_parses_gateway_shape() {
        let body = r#"{
            "ResponseCode": 0,
            "CheckoutRequestID": "ws_CO_123",
            "ResponseDescription": "Success. Request accepted for processing"
        }"#;
        let parsed: PushResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.response_code, 0);
        assert_eq!(parsed.checkout_request_id.as_deref(), Some("ws_CO_123"));
    }

    #[test]
    fn callback_parses_without_api_ref() {
        let body = r#"{"CheckoutRequestID": "ws_CO_9", "status": "payment.success"}"#;
        let parsed: LipwaCallback = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.checkout_request_id, "ws_CO_9");
        assert!(parsed.api_ref.is_none());
    }
}
