use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
pub enum WithdrawalRail {
    MobileMoney,
    Paypal,
    Bank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Completed,
    Failed,
}

/// Rail-specific payout destination. Which fields are required depends on
/// the rail; see `domain::validate_destination`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WithdrawalDestination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
}

/// A payout request. Immutable once created except for the status, which an
/// external reconciliation process moves to completed or failed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub rail: WithdrawalRail,
    pub destination: Json<WithdrawalDestination>,
    pub status: WithdrawalStatus,
    pub idempotency_key: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub rail: WithdrawalRail,
    pub destination: WithdrawalDestination,
    /// Caller-supplied key so a double-click or retried request replays the
    /// original withdrawal instead of creating a second one.
    #[validate(length(min = 8, max = 128))]
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalListQuery {
    pub user_id: Uuid,
}
