use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Platform worker. Balance only ever increases through approvals and
/// decreases through withdrawal requests; the store enforces it never goes
/// negative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    pub full_name: String,
    pub email: Option<String>,
    pub balance: Decimal,
    pub completed_tasks: i32,
    pub applied_tasks: i32,
    pub this_month_earned: Decimal,
    pub total_earned: Decimal,
    pub success_rate: f64,
    pub referral_code: Option<String>,
    pub referred_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Per-user per-day rollup, keyed by (user, calendar day). Backs the daily
/// task quota and the dashboard earnings chart.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyTaskStats {
    pub user_id: Uuid,
    pub day: chrono::NaiveDate,
    pub tasks_completed: i32,
    pub earnings: Decimal,
}
