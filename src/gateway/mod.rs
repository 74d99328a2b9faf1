mod lipwa;
mod palmpesa;

pub use lipwa::{normalize_status as lipwa_status_from_raw, LipwaCallback, LipwaClient};
pub use palmpesa::{normalize_status as palmpesa_status_from_raw, PalmPesaCallback, PalmPesaClient};

use axum::http::StatusCode;
use serde::de::DeserializeOwned;

use crate::models::PaymentStatus;

/// How much of an upstream body is kept for diagnostics. Gateways have been
/// seen returning whole HTML error pages.
const SNIPPET_LEN: usize = 200;

/// Failures talking to a payment gateway, normalized so callers never see a
/// raw reqwest or serde error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Connect(String),

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway returned non-JSON body: {snippet}")]
    NonJson { snippet: String },

    #[error("gateway returned HTTP {status}: {snippet}")]
    Http { status: u16, snippet: String },

    #[error("gateway declined: {message}")]
    Declined { status: u16, message: String },
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Connect(_) | GatewayError::Timeout | GatewayError::NonJson { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Http { status, .. } | GatewayError::Declined { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Connect(_) => "Payment provider is unreachable".to_string(),
            GatewayError::Timeout => "Payment provider timed out".to_string(),
            GatewayError::NonJson { .. } | GatewayError::Http { .. } => {
                "Payment provider returned an unexpected response".to_string()
            }
            GatewayError::Declined { message, .. } => message.clone(),
        }
    }

    pub fn is_non_json(&self) -> bool {
        matches!(self, GatewayError::NonJson { .. })
    }
}

/// Successful initiation: the gateway accepted the push and handed back its
/// own reference for later status lookups.
#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub gateway_reference: String,
    pub description: String,
}

/// Result of a status poll. `raw_status` preserves the upstream vocabulary
/// because the normalized enum loses the cancelled/failed distinction.
#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub status: PaymentStatus,
    pub raw_status: String,
}

pub(crate) fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= SNIPPET_LEN {
        trimmed.to_string()
    } else {
        let mut end = SNIPPET_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Connect(snippet(&err.to_string()))
    }
}

/// Reads the response body once, then decides: non-2xx is an HTTP error with
/// the body snippet attached; 2xx with an unparsable body is `NonJson` rather
/// than a raw serde error bubbling out.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;

    if !status.is_success() {
        return Err(GatewayError::Http {
            status: status.as_u16(),
            snippet: snippet(&body),
        });
    }

    serde_json::from_str(&body).map_err(|_| GatewayError::NonJson {
        snippet: snippet(&body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(500);
        let s = snippet(&body);
        assert_eq!(s.len(), SNIPPET_LEN + 3);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn snippet_keeps_short_bodies_intact() {
        assert_eq!(snippet("  {\"ok\":true} "), "{\"ok\":true}");
    }

    #[test]
    fn unparsable_success_body_is_a_non_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("<html>oops")
            .map_err(|_| GatewayError::NonJson {
                snippet: snippet("<html>oops"),
            })
            .unwrap_err();
        assert!(err.is_non_json());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn declined_error_passes_through_gateway_status_and_message() {
        let err = GatewayError::Declined {
            status: 400,
            message: "Insufficient float".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Insufficient float");
    }

    #[test]
    fn snippet_respects_utf8_boundaries() {
        let body = "é".repeat(300);
        let s = snippet(&body);
        assert!(s.ends_with("..."));
        // Must not panic or split a code point.
        assert!(s.len() <= SNIPPET_LEN + 3);
    }
}
