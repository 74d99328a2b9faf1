use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gateway status normalized across both integrations. The raw upstream
/// status string is kept alongside because some gateways conflate user
/// cancellation with outright failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum PaymentGateway {
    Lipwa,
    Palmpesa,
}

/// One inbound-collection attempt (a user paying into the platform —
/// distinct from earning).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub gateway: PaymentGateway,
    pub client_reference: String,
    pub gateway_reference: Option<String>,
    pub amount: Decimal,
    pub phone: String,
    pub status: PaymentStatus,
    pub raw_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: Option<Uuid>,
    pub phone: String,
    pub amount: Decimal,
}
