use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::types::Json as SqlJson;
use validator::Validate;

use crate::domain::{self, MIN_WITHDRAWAL};
use crate::errors::AppError;
use crate::models::{Withdrawal, WithdrawRequest, WithdrawalListQuery};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(request_withdrawal))
        .route("/", get(list_withdrawals))
}

/// Converts balance into a pending payout request. The availability check,
/// the decrement and the request insert are one transaction: either both
/// writes commit or neither does.
async fn request_withdrawal(
    State(state): State<AppState>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<Value>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(format!("Validation error: {}", e)))?;

    if payload.amount < MIN_WITHDRAWAL {
        return Err(AppError::validation(format!(
            "Minimum withdrawal is {}",
            MIN_WITHDRAWAL
        )));
    }

    domain::validate_destination(payload.rail, &payload.destination)
        .map_err(AppError::Validation)?;

    // Replay: the same idempotency key always returns the original request,
    // so a double-click or retried POST cannot debit twice.
    let existing: Option<Withdrawal> =
        sqlx::query_as("SELECT * FROM withdrawals WHERE idempotency_key = $1")
            .bind(&payload.idempotency_key)
            .fetch_optional(&state.db)
            .await?;
    if let Some(withdrawal) = existing {
        return Ok(Json(withdrawal_response(withdrawal, None, true)));
    }

    let mut tx = state.db.begin().await?;

    // Conditional decrement: read-modify-write in one statement so two
    // back-to-back requests cannot both pass a stale balance check.
    let new_balance: Option<Decimal> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET balance = balance - $1
        WHERE id = $2 AND balance >= $1
        RETURNING balance
        "#,
    )
    .bind(payload.amount)
    .bind(payload.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(new_balance) = new_balance else {
        tx.rollback().await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(payload.user_id)
            .fetch_one(&state.db)
            .await?;
        return if exists {
            Err(AppError::InsufficientBalance)
        } else {
            Err(AppError::not_found("User not found"))
        };
    };

    let withdrawal: Option<Withdrawal> = sqlx::query_as(
        r#"
        INSERT INTO withdrawals (user_id, amount, rail, destination, idempotency_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(payload.user_id)
    .bind(payload.amount)
    .bind(payload.rail)
    .bind(SqlJson(&payload.destination))
    .bind(&payload.idempotency_key)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(withdrawal) = withdrawal else {
        // Lost an idempotency race after the first SELECT; undo the
        // decrement and replay the winner's record.
        tx.rollback().await?;
        let winner: Withdrawal =
            sqlx::query_as("SELECT * FROM withdrawals WHERE idempotency_key = $1")
                .bind(&payload.idempotency_key)
                .fetch_one(&state.db)
                .await?;
        return Ok(Json(withdrawal_response(winner, None, true)));
    };

    tx.commit().await?;

    tracing::info!(
        "Withdrawal {} of {} requested by {}",
        withdrawal.id,
        withdrawal.amount,
        withdrawal.user_id
    );

    Ok(Json(withdrawal_response(withdrawal, Some(new_balance), false)))
}

fn withdrawal_response(withdrawal: Withdrawal, new_balance: Option<Decimal>, replayed: bool) -> Value {
    let (fee, payout) = domain::withdrawal_fee(withdrawal.amount);
    json!({
        "error": false,
        "withdrawal": withdrawal,
        "fee": fee,
        "payout_after_fee": payout,
        "new_balance": new_balance,
        "replayed": replayed
    })
}

async fn list_withdrawals(
    State(state): State<AppState>,
    Query(params): Query<WithdrawalListQuery>,
) -> Result<Json<Value>, AppError> {
    let withdrawals: Vec<Withdrawal> =
        sqlx::query_as("SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY requested_at DESC")
            .bind(params.user_id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(json!({ "error": false, "withdrawals": withdrawals })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WithdrawalDestination, WithdrawalRail, WithdrawalStatus};
    use rust_decimal_macros::dec;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn seed_user_with_balance(db: &PgPool, balance: Decimal) -> Uuid {
        let phone = format!("07{:08}", Uuid::new_v4().as_u128() % 100_000_000);
        sqlx::query_scalar(
            "INSERT INTO users (phone, full_name, balance) VALUES ($1, 'Juma Khamis', $2) RETURNING id",
        )
        .bind(phone)
        .bind(balance)
        .fetch_one(db)
        .await
        .unwrap()
    }

    fn mobile_money_request(user_id: Uuid, amount: Decimal, key: &str) -> WithdrawRequest {
        WithdrawRequest {
            user_id,
            amount,
            rail: WithdrawalRail::MobileMoney,
            destination: WithdrawalDestination {
                phone: Some("0712345678".to_string()),
                ..Default::default()
            },
            idempotency_key: key.to_string(),
        }
    }

    async fn balance_of(db: &PgPool, user_id: Uuid) -> Decimal {
        sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn withdrawal_count(db: &PgPool, user_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn insufficient_balance_writes_nothing(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user_with_balance(&db, dec!(5)).await;

        let err = request_withdrawal(
            State(state),
            Json(mobile_money_request(user_id, dec!(10), "retry-key-0001")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance));

        assert_eq!(balance_of(&db, user_id).await, dec!(5));
        assert_eq!(withdrawal_count(&db, user_id).await, 0);
    }

    #[sqlx::test]
    async fn below_minimum_amount_writes_nothing(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user_with_balance(&db, dec!(50)).await;

        let err = request_withdrawal(
            State(state),
            Json(mobile_money_request(user_id, dec!(5), "retry-key-0002")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(balance_of(&db, user_id).await, dec!(50));
        assert_eq!(withdrawal_count(&db, user_id).await, 0);
    }

    #[sqlx::test]
    async fn successful_request_debits_the_balance_once(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user_with_balance(&db, dec!(15)).await;

        let Json(body) = request_withdrawal(
            State(state),
            Json(mobile_money_request(user_id, dec!(10), "retry-key-0003")),
        )
        .await
        .unwrap();
        assert_eq!(body["error"], json!(false));
        assert_eq!(body["replayed"], json!(false));

        assert_eq!(balance_of(&db, user_id).await, dec!(5));

        let (amount, status): (Decimal, WithdrawalStatus) =
            sqlx::query_as("SELECT amount, status FROM withdrawals WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(amount, dec!(10));
        assert_eq!(status, WithdrawalStatus::Pending);
    }

    #[sqlx::test]
    async fn repeated_idempotency_key_replays_without_a_second_debit(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user_with_balance(&db, dec!(30)).await;

        let Json(first) = request_withdrawal(
            State(state.clone()),
            Json(mobile_money_request(user_id, dec!(10), "retry-key-0004")),
        )
        .await
        .unwrap();
        assert_eq!(first["replayed"], json!(false));

        let Json(second) = request_withdrawal(
            State(state),
            Json(mobile_money_request(user_id, dec!(10), "retry-key-0004")),
        )
        .await
        .unwrap();
        assert_eq!(second["replayed"], json!(true));
        assert_eq!(
            second["withdrawal"]["id"],
            first["withdrawal"]["id"]
        );

        assert_eq!(balance_of(&db, user_id).await, dec!(20));
        assert_eq!(withdrawal_count(&db, user_id).await, 1);
    }
}
