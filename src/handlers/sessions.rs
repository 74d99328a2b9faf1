use axum::{
    extract::{Path, State},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::models::{FlushSessionRequest, StartSessionRequest, WorkSession};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_session))
        .route("/:id/flush", post(flush_session))
        .route("/:id/stop", post(stop_session))
}

/// Opens a work session, first closing any session the user left dangling
/// (a crashed tab never sends its stop).
async fn start_session(
    State(state): State<AppState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(payload.user_id)
        .fetch_one(&state.db)
        .await?;
    if !user_exists {
        return Err(AppError::not_found("User not found"));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query("UPDATE work_sessions SET ended_at = NOW() WHERE user_id = $1 AND ended_at IS NULL")
        .bind(payload.user_id)
        .execute(&mut *tx)
        .await?;

    let session: WorkSession = sqlx::query_as(
        "INSERT INTO work_sessions (user_id) VALUES ($1) RETURNING *",
    )
    .bind(payload.user_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({ "error": false, "session": session })))
}

/// Periodic flush of cumulative active seconds. GREATEST keeps the counter
/// monotonic even if flushes arrive out of order.
async fn flush_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FlushSessionRequest>,
) -> Result<Json<Value>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(format!("Validation error: {}", e)))?;

    let updated = sqlx::query(
        r#"
        UPDATE work_sessions
        SET seconds_active = GREATEST(seconds_active, $1), last_flush_at = NOW()
        WHERE id = $2 AND ended_at IS NULL
        "#,
    )
    .bind(payload.seconds_active)
    .bind(id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::conflict("Session is not open"));
    }

    Ok(Json(json!({ "error": false, "flushed": true })))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FlushSessionRequest>,
) -> Result<Json<Value>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(format!("Validation error: {}", e)))?;

    let updated = sqlx::query(
        r#"
        UPDATE work_sessions
        SET seconds_active = GREATEST(seconds_active, $1),
            last_flush_at = NOW(),
            ended_at = NOW()
        WHERE id = $2 AND ended_at IS NULL
        "#,
    )
    .bind(payload.seconds_active)
    .bind(id)
    .execute(&state.db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::conflict("Session is not open"));
    }

    Ok(Json(json!({ "error": false, "stopped": true })))
}
