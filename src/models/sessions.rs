use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A work session tracked explicitly with start/flush/stop operations
/// instead of a client-side interval timer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub seconds_active: i32,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FlushSessionRequest {
    #[validate(range(min = 0, max = 86400))]
    pub seconds_active: i32,
}
