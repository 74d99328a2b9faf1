use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::{self, MIN_PAYMENT};
use crate::errors::AppError;
use crate::gateway::{LipwaCallback, PalmPesaCallback};
use crate::models::{InitiatePaymentRequest, PaymentAttempt, PaymentGateway, PaymentStatus};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lipwa/initiate", post(initiate_lipwa))
        .route("/lipwa/status/:reference", get(lipwa_status))
        .route("/lipwa/callback", post(lipwa_callback))
        .route("/palmpesa/initiate", post(initiate_palmpesa))
        .route("/palmpesa/status/:order_id", get(palmpesa_status))
        .route("/palmpesa/callback", post(palmpesa_callback))
        .route("/attempts/:user_id", get(list_attempts))
}

// Gateways redeliver terminal callbacks at-least-once; references seen with
// a terminal status are remembered so redeliveries become no-ops without a
// database round trip.
static SEEN_CALLBACKS: OnceLock<DashMap<String, Instant>> = OnceLock::new();

const CALLBACK_CACHE_TTL: Duration = Duration::from_secs(3600);
const CALLBACK_CACHE_MAX: usize = 10_000;

fn seen_callbacks() -> &'static DashMap<String, Instant> {
    SEEN_CALLBACKS.get_or_init(DashMap::new)
}

fn callback_already_seen(key: &str) -> bool {
    let cache = seen_callbacks();
    if let Some(seen_at) = cache.get(key) {
        if seen_at.elapsed() < CALLBACK_CACHE_TTL {
            return true;
        }
        drop(seen_at);
        cache.remove(key);
    }
    false
}

fn remember_callback(key: String) {
    let cache = seen_callbacks();
    if cache.len() >= CALLBACK_CACHE_MAX {
        cache.retain(|_, seen_at| seen_at.elapsed() < CALLBACK_CACHE_TTL);
    }
    cache.insert(key, Instant::now());
}

fn validate_collection_input(payload: &InitiatePaymentRequest) -> Result<(), AppError> {
    if !domain::is_valid_tz_phone(&payload.phone) {
        return Err(AppError::validation(
            "Phone must be a valid Tanzanian mobile number",
        ));
    }
    if payload.amount < MIN_PAYMENT {
        return Err(AppError::validation(format!(
            "Minimum payment amount is {}",
            MIN_PAYMENT
        )));
    }
    Ok(())
}

async fn record_attempt(
    db: &PgPool,
    payload: &InitiatePaymentRequest,
    gateway: PaymentGateway,
    client_reference: &str,
) -> Result<Uuid, AppError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO payment_attempts (user_id, gateway, client_reference, amount, phone)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(payload.user_id)
    .bind(gateway)
    .bind(client_reference)
    .bind(payload.amount)
    .bind(&payload.phone)
    .fetch_one(db)
    .await?;
    Ok(id)
}

/// Terminal statuses are write-once: the conditional `status = 'PENDING'`
/// makes both the poll path and repeated webhook deliveries idempotent.
async fn apply_gateway_status(
    db: &PgPool,
    gateway: PaymentGateway,
    gateway_reference: &str,
    status: PaymentStatus,
    raw_status: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE payment_attempts
        SET status = $1, raw_status = $2, updated_at = NOW()
        WHERE gateway = $3 AND gateway_reference = $4 AND status = 'PENDING'
        "#,
    )
    .bind(status)
    .bind(raw_status)
    .bind(gateway)
    .bind(gateway_reference)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Callback writes get a short fixed-delay retry before giving up; the
/// gateway will redeliver eventually, but a transient pool hiccup should
/// not have to wait for it.
async fn apply_with_retry(
    db: &PgPool,
    gateway: PaymentGateway,
    gateway_reference: &str,
    status: PaymentStatus,
    raw_status: &str,
) -> Result<u64, AppError> {
    const ATTEMPTS: u32 = 3;
    const RETRY_DELAY: Duration = Duration::from_millis(500);

    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        match apply_gateway_status(db, gateway, gateway_reference, status, raw_status).await {
            Ok(updated) => return Ok(updated),
            Err(e) => {
                tracing::warn!(
                    "Callback write attempt {}/{} for {} failed: {}",
                    attempt,
                    ATTEMPTS,
                    gateway_reference,
                    e
                );
                last_err = Some(e);
                if attempt < ATTEMPTS {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt"))
}

/// STK push via gateway A. Validation happens before any network call; a
/// transport failure leaves the attempt PENDING because the outcome is
/// genuinely unknown, while a decline marks it FAILED.
async fn initiate_lipwa(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    validate_collection_input(&payload)?;

    let client_reference = format!("kp-{}", Uuid::new_v4());
    record_attempt(&state.db, &payload, PaymentGateway::Lipwa, &client_reference).await?;

    match state
        .lipwa
        .initiate(payload.phone.trim(), payload.amount, &client_reference)
        .await
    {
        Ok(outcome) => {
            sqlx::query(
                "UPDATE payment_attempts SET gateway_reference = $1 WHERE client_reference = $2",
            )
            .bind(&outcome.gateway_reference)
            .bind(&client_reference)
            .execute(&state.db)
            .await?;

            Ok(Json(json!({
                "error": false,
                "client_reference": client_reference,
                "gateway_reference": outcome.gateway_reference,
                "message": outcome.description
            })))
        }
        Err(err) => {
            if matches!(err, crate::gateway::GatewayError::Declined { .. }) {
                sqlx::query(
                    "UPDATE payment_attempts SET status = 'FAILED', updated_at = NOW() \
                     WHERE client_reference = $1 AND status = 'PENDING'",
                )
                .bind(&client_reference)
                .execute(&state.db)
                .await?;
            }
            Err(err.into())
        }
    }
}

async fn lipwa_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.lipwa.status(&reference).await?;

    if outcome.status.is_terminal() {
        apply_gateway_status(
            &state.db,
            PaymentGateway::Lipwa,
            &reference,
            outcome.status,
            &outcome.raw_status,
        )
        .await?;
    }

    Ok(Json(json!({
        "error": false,
        "status": outcome.status,
        "raw_status": outcome.raw_status
    })))
}

/// Webhook receiver. Always acknowledges with 200 — the gateway retries
/// forever otherwise — and logs internal failures for manual follow-up.
async fn lipwa_callback(
    State(state): State<AppState>,
    Json(payload): Json<LipwaCallback>,
) -> Json<Value> {
    let status = crate::gateway::lipwa_status_from_raw(&payload.status);
    let dedup_key = format!("lipwa:{}:{}", payload.checkout_request_id, payload.status);

    if status.is_terminal() && callback_already_seen(&dedup_key) {
        return Json(json!({ "error": false, "received": true }));
    }

    if status.is_terminal() {
        match apply_with_retry(
            &state.db,
            PaymentGateway::Lipwa,
            &payload.checkout_request_id,
            status,
            &payload.status,
        )
        .await
        {
            Ok(updated) => {
                if updated > 0 {
                    tracing::info!(
                        "Lipwa callback settled {} as {:?}",
                        payload.checkout_request_id,
                        status
                    );
                }
                remember_callback(dedup_key);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to apply Lipwa callback for {}: {}",
                    payload.checkout_request_id,
                    e
                );
            }
        }
    }

    Json(json!({ "error": false, "received": true }))
}

async fn initiate_palmpesa(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    validate_collection_input(&payload)?;

    let (payer_name, payer_email) = match payload.user_id {
        Some(user_id) => {
            let user: Option<(String, Option<String>)> =
                sqlx::query_as("SELECT full_name, email FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_optional(&state.db)
                    .await?;
            let (name, email) = user.ok_or_else(|| AppError::not_found("User not found"))?;
            (name, email.unwrap_or_else(|| "guest@kazipesa.co.tz".to_string()))
        }
        None => ("Guest".to_string(), "guest@kazipesa.co.tz".to_string()),
    };

    let client_reference = format!("kp-{}", Uuid::new_v4());
    record_attempt(&state.db, &payload, PaymentGateway::Palmpesa, &client_reference).await?;

    match state
        .palmpesa
        .initiate(
            payload.phone.trim(),
            payload.amount,
            &client_reference,
            &payer_name,
            &payer_email,
        )
        .await
    {
        Ok(outcome) => {
            sqlx::query(
                "UPDATE payment_attempts SET gateway_reference = $1 WHERE client_reference = $2",
            )
            .bind(&outcome.gateway_reference)
            .bind(&client_reference)
            .execute(&state.db)
            .await?;

            Ok(Json(json!({
                "error": false,
                "client_reference": client_reference,
                "order_id": outcome.gateway_reference,
                "message": outcome.description
            })))
        }
        Err(err) => {
            if matches!(err, crate::gateway::GatewayError::Declined { .. }) {
                sqlx::query(
                    "UPDATE payment_attempts SET status = 'FAILED', updated_at = NOW() \
                     WHERE client_reference = $1 AND status = 'PENDING'",
                )
                .bind(&client_reference)
                .execute(&state.db)
                .await?;
            }
            Err(err.into())
        }
    }
}

async fn palmpesa_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.palmpesa.order_status(&order_id).await?;

    if outcome.status.is_terminal() {
        apply_gateway_status(
            &state.db,
            PaymentGateway::Palmpesa,
            &order_id,
            outcome.status,
            &outcome.raw_status,
        )
        .await?;
    }

    Ok(Json(json!({
        "error": false,
        "status": outcome.status,
        "raw_status": outcome.raw_status
    })))
}

async fn palmpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<PalmPesaCallback>,
) -> Json<Value> {
    let status = crate::gateway::palmpesa_status_from_raw(&payload.status);
    let dedup_key = format!("palmpesa:{}:{}", payload.order_id, payload.status);

    if status.is_terminal() && callback_already_seen(&dedup_key) {
        return Json(json!({ "error": false, "received": true }));
    }

    if status.is_terminal() {
        match apply_with_retry(
            &state.db,
            PaymentGateway::Palmpesa,
            &payload.order_id,
            status,
            &payload.status,
        )
        .await
        {
            Ok(updated) => {
                if updated > 0 {
                    tracing::info!(
                        "PalmPesa callback settled {} as {:?}",
                        payload.order_id,
                        status
                    );
                }
                remember_callback(dedup_key);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to apply PalmPesa callback for {}: {}",
                    payload.order_id,
                    e
                );
            }
        }
    }

    Json(json!({ "error": false, "received": true }))
}

/// A user's recorded collection attempts (audit view).
async fn list_attempts(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let attempts: Vec<PaymentAttempt> =
        sqlx::query_as("SELECT * FROM payment_attempts WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(json!({ "error": false, "attempts": attempts })))
}
