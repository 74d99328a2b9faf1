use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::domain;
use crate::errors::AppError;
use crate::models::{DailyTaskStats, User};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_user))
        .route("/:id/daily-stats", get(get_daily_stats))
}

/// Worker onboarding happens through the admin surface; self-serve signup
/// is out of scope.
pub fn admin_router() -> Router<AppState> {
    Router::new().route("/", post(create_user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(json!({ "error": false, "user": user })))
}

/// Dashboard rollup: per-day completions and earnings, most recent first.
async fn get_daily_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let stats: Vec<DailyTaskStats> = sqlx::query_as(
        "SELECT * FROM daily_task_stats WHERE user_id = $1 ORDER BY day DESC LIMIT 31",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "error": false, "daily_stats": stats })))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUserRequest {
    phone: String,
    #[validate(length(min = 1, max = 200))]
    full_name: String,
    #[validate(email)]
    email: Option<String>,
    referral_code: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<Value>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(format!("Validation error: {}", e)))?;

    if !domain::is_valid_tz_phone(&payload.phone) {
        return Err(AppError::validation(
            "Phone must be a valid Tanzanian mobile number",
        ));
    }

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (phone, full_name, email, referral_code)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(payload.phone.trim())
    .bind(&payload.full_name)
    .bind(&payload.email)
    .bind(&payload.referral_code)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.constraint() == Some("users_phone_key") => {
            AppError::conflict("A user with this phone number already exists")
        }
        _ => AppError::from(e),
    })?;

    Ok(Json(json!({ "error": false, "user": user })))
}
