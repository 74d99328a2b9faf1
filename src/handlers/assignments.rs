use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain;
use crate::errors::AppError;
use crate::models::{
    Assignment, AssignmentListQuery, AssignmentStatus, Question, RejectAssignmentRequest,
    StartAssignmentRequest, SubmitAssignmentRequest,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_assignment))
        .route("/", get(list_assignments))
        .route("/:id/submit", post(submit_assignment))
}

/// Review-dashboard operations; mounted behind the admin guard.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(list_pending_review))
        .route("/:id/approve", post(approve_assignment))
        .route("/:id/reject", post(reject_assignment))
}

/// Create: `active` is the only creatable state. The partial unique index on
/// (user_id, task_id) WHERE status = 'active' turns a create race into a
/// constraint violation instead of a duplicate.
async fn start_assignment(
    State(state): State<AppState>,
    Json(payload): Json<StartAssignmentRequest>,
) -> Result<Json<Value>, AppError> {
    let task_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM tasks WHERE id = $1")
        .bind(payload.task_id)
        .fetch_optional(&state.db)
        .await?;
    match task_active {
        None => return Err(AppError::not_found("Task not found")),
        Some(false) => return Err(AppError::conflict("Task is closed")),
        Some(true) => {}
    }

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(payload.user_id)
        .fetch_one(&state.db)
        .await?;
    if !user_exists {
        return Err(AppError::not_found("User not found"));
    }

    let completed_today: Option<i32> = sqlx::query_scalar(
        "SELECT tasks_completed FROM daily_task_stats WHERE user_id = $1 AND day = CURRENT_DATE",
    )
    .bind(payload.user_id)
    .fetch_optional(&state.db)
    .await?;
    if i64::from(completed_today.unwrap_or(0)) >= state.config.daily_task_limit {
        return Err(AppError::conflict("Daily task limit reached"));
    }

    let mut tx = state.db.begin().await?;

    let assignment: Assignment = sqlx::query_as(
        r#"
        INSERT INTO assignments (user_id, task_id, status)
        VALUES ($1, $2, 'active')
        RETURNING *
        "#,
    )
    .bind(payload.user_id)
    .bind(payload.task_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.constraint() == Some("assignments_one_active") => {
            AppError::conflict("You already have an active assignment for this task")
        }
        _ => AppError::from(e),
    })?;

    sqlx::query("UPDATE users SET applied_tasks = applied_tasks + 1 WHERE id = $1")
        .bind(payload.user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(json!({ "error": false, "assignment": assignment })))
}

async fn list_assignments(
    State(state): State<AppState>,
    Query(params): Query<AssignmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let assignments: Vec<Assignment> =
        sqlx::query_as("SELECT * FROM assignments WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(params.user_id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(json!({ "error": false, "assignments": assignments })))
}

/// Submit: `active -> completed`. Every required question needs a usable
/// answer; the auto-approval deadline is stamped 5-20 minutes out for the
/// sweep to pick up if no reviewer gets there first.
async fn submit_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAssignmentRequest>,
) -> Result<Json<Value>, AppError> {
    let mut tx = state.db.begin().await?;

    let current: Option<Assignment> =
        sqlx::query_as("SELECT * FROM assignments WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let current = current.ok_or_else(|| AppError::not_found("Assignment not found"))?;

    if current.status != AssignmentStatus::Active {
        return Err(AppError::conflict("Assignment is not active"));
    }

    let questions: Vec<Question> =
        sqlx::query_as("SELECT * FROM questions WHERE task_id = $1 ORDER BY position")
            .bind(current.task_id)
            .fetch_all(&mut *tx)
            .await?;

    let missing = domain::missing_required_answers(&questions, &payload.answers);
    if !missing.is_empty() {
        let ids = missing
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AppError::validation(format!(
            "Missing answers for required questions: {}",
            ids
        )));
    }

    let auto_approve_at = domain::schedule_auto_approval(Utc::now(), &mut rand::thread_rng());

    let updated: Assignment = sqlx::query_as(
        r#"
        UPDATE assignments
        SET status = 'completed',
            submission_data = $1,
            completed_at = NOW(),
            auto_approve_at = $2
        WHERE id = $3 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(SqlJson(&payload.answers))
    .bind(auto_approve_at)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET completed_tasks = completed_tasks + 1 WHERE id = $1")
        .bind(current.user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO daily_task_stats (user_id, day, tasks_completed)
        VALUES ($1, CURRENT_DATE, 1)
        ON CONFLICT (user_id, day)
        DO UPDATE SET tasks_completed = daily_task_stats.tasks_completed + 1
        "#,
    )
    .bind(current.user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({ "error": false, "assignment": updated })))
}

#[derive(Debug, Deserialize, Default)]
struct ApproveAssignmentRequest {
    reviewer: Option<String>,
}

/// What an approval credited, for the notification mail.
pub struct ApprovalOutcome {
    pub user_email: Option<String>,
    pub user_name: String,
    pub task_title: String,
    pub reward: Decimal,
}

/// Approve: `completed -> approved`, shared by the manual path and the
/// sweep. The status check rides inside the UPDATE itself, so whichever
/// actor loses a race gets `None` back and applies no side effects.
pub async fn approve_in_tx(
    db: &PgPool,
    assignment_id: Uuid,
    reviewer: &str,
) -> Result<Option<ApprovalOutcome>, AppError> {
    let mut tx = db.begin().await?;

    let transitioned: Option<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        UPDATE assignments
        SET status = 'approved',
            reviewed_by = $1,
            reviewed_at = NOW(),
            auto_approve_at = NULL
        WHERE id = $2 AND status = 'completed'
        RETURNING user_id, task_id
        "#,
    )
    .bind(reviewer)
    .bind(assignment_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((user_id, task_id)) = transitioned else {
        tx.rollback().await?;
        return Ok(None);
    };

    let (task_title, reward): (String, Decimal) =
        sqlx::query_as("SELECT title, reward FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

    let (user_name, user_email): (String, Option<String>) = sqlx::query_as(
        r#"
        UPDATE users
        SET balance = balance + $1,
            this_month_earned = this_month_earned + $1,
            total_earned = total_earned + $1,
            success_rate = CASE
                WHEN applied_tasks > 0 THEN completed_tasks::float8 / applied_tasks
                ELSE 0
            END
        WHERE id = $2
        RETURNING full_name, email
        "#,
    )
    .bind(reward)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO daily_task_stats (user_id, day, earnings)
        VALUES ($1, CURRENT_DATE, $2)
        ON CONFLICT (user_id, day)
        DO UPDATE SET earnings = daily_task_stats.earnings + $2
        "#,
    )
    .bind(user_id)
    .bind(reward)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(ApprovalOutcome {
        user_email,
        user_name,
        task_title,
        reward,
    }))
}

async fn approve_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ApproveAssignmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let reviewer = payload
        .and_then(|Json(p)| p.reviewer)
        .unwrap_or_else(|| "admin".to_string());

    match approve_in_tx(&state.db, id, &reviewer).await? {
        Some(outcome) => {
            tracing::info!(
                "Assignment {} approved by {}, credited {}",
                id,
                reviewer,
                outcome.reward
            );

            if let Some(email) = outcome.user_email.clone() {
                let mailer = state.mailer.clone();
                tokio::spawn(async move {
                    mailer
                        .send_award_notification(
                            &email,
                            &outcome.user_name,
                            &outcome.task_title,
                            outcome.reward,
                        )
                        .await;
                });
            }

            Ok(Json(json!({ "error": false, "status": "approved" })))
        }
        None => {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM assignments WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&state.db)
                    .await?;
            if exists {
                Err(AppError::conflict("Assignment is not awaiting review"))
            } else {
                Err(AppError::not_found("Assignment not found"))
            }
        }
    }
}

/// Reject: `completed -> rejected`. Clearing `auto_approve_at` in the same
/// UPDATE is what keeps the sweep from approving an already-rejected item
/// whose deadline had passed. Returns false when the assignment was not
/// awaiting review.
pub(crate) async fn reject_in_tx(
    db: &PgPool,
    assignment_id: Uuid,
    reviewer: &str,
    reason: &str,
) -> Result<bool, AppError> {
    let rejected = sqlx::query(
        r#"
        UPDATE assignments
        SET status = 'rejected',
            rejection_reason = $1,
            reviewed_by = $2,
            reviewed_at = NOW(),
            auto_approve_at = NULL
        WHERE id = $3 AND status = 'completed'
        "#,
    )
    .bind(reason)
    .bind(reviewer)
    .bind(assignment_id)
    .execute(db)
    .await?;

    Ok(rejected.rows_affected() > 0)
}

/// Admin-only; a non-empty reason is required.
async fn reject_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectAssignmentRequest>,
) -> Result<Json<Value>, AppError> {
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::validation("A rejection reason is required"));
    }

    if !reject_in_tx(&state.db, id, "admin", reason).await? {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM assignments WHERE id = $1)")
                .bind(id)
                .fetch_one(&state.db)
                .await?;
        return if exists {
            Err(AppError::conflict("Assignment is not awaiting review"))
        } else {
            Err(AppError::not_found("Assignment not found"))
        };
    }

    Ok(Json(json!({ "error": false, "status": "rejected" })))
}

async fn list_pending_review(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let assignments: Vec<Assignment> = sqlx::query_as(
        "SELECT * FROM assignments WHERE status = 'completed' ORDER BY completed_at ASC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "error": false, "assignments": assignments })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionAnswer;
    use chrono::{DateTime, Duration};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    async fn seed_user(db: &PgPool) -> Uuid {
        let phone = format!("07{:08}", Uuid::new_v4().as_u128() % 100_000_000);
        sqlx::query_scalar(
            "INSERT INTO users (phone, full_name, email) VALUES ($1, 'Asha Mrema', 'asha@example.com') RETURNING id",
        )
        .bind(phone)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn seed_task(db: &PgPool, reward: Decimal) -> (Uuid, Uuid) {
        let task_id: Uuid = sqlx::query_scalar(
            "INSERT INTO tasks (title, category, reward) VALUES ('Airtime price survey', 'survey', $1) RETURNING id",
        )
        .bind(reward)
        .fetch_one(db)
        .await
        .unwrap();

        let question_id: Uuid = sqlx::query_scalar(
            "INSERT INTO questions (task_id, position, question_type, prompt) VALUES ($1, 0, 'text', 'How much does 1GB of data cost?') RETURNING id",
        )
        .bind(task_id)
        .fetch_one(db)
        .await
        .unwrap();

        (task_id, question_id)
    }

    async fn seed_completed_assignment(
        db: &PgPool,
        user_id: Uuid,
        task_id: Uuid,
        auto_approve_at: DateTime<Utc>,
    ) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO assignments (user_id, task_id, status, completed_at, auto_approve_at)
            VALUES ($1, $2, 'completed', NOW(), $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(task_id)
        .bind(auto_approve_at)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn balance_of(db: &PgPool, user_id: Uuid) -> Decimal {
        sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn status_of(db: &PgPool, assignment_id: Uuid) -> AssignmentStatus {
        sqlx::query_scalar("SELECT status FROM assignments WHERE id = $1")
            .bind(assignment_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn double_approval_credits_the_reward_once(db: PgPool) {
        let user_id = seed_user(&db).await;
        let (task_id, _) = seed_task(&db, dec!(20)).await;
        let assignment_id =
            seed_completed_assignment(&db, user_id, task_id, Utc::now() + Duration::minutes(10))
                .await;

        let first = approve_in_tx(&db, assignment_id, "admin").await.unwrap();
        assert!(first.is_some());

        let second = approve_in_tx(&db, assignment_id, "auto").await.unwrap();
        assert!(second.is_none());

        assert_eq!(balance_of(&db, user_id).await, dec!(20));
        assert_eq!(status_of(&db, assignment_id).await, AssignmentStatus::Approved);

        let reviewer: Option<String> =
            sqlx::query_scalar("SELECT reviewed_by FROM assignments WHERE id = $1")
                .bind(assignment_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(reviewer.as_deref(), Some("admin"));
    }

    #[sqlx::test]
    async fn rejection_clears_the_deadline_and_blocks_later_approval(db: PgPool) {
        let user_id = seed_user(&db).await;
        let (task_id, _) = seed_task(&db, dec!(20)).await;
        // Deadline already in the past, as the sweep would find it.
        let assignment_id =
            seed_completed_assignment(&db, user_id, task_id, Utc::now() - Duration::minutes(1))
                .await;

        let rejected = reject_in_tx(&db, assignment_id, "admin", "Blurry screenshot")
            .await
            .unwrap();
        assert!(rejected);

        let deadline: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT auto_approve_at FROM assignments WHERE id = $1")
                .bind(assignment_id)
                .fetch_one(&db)
                .await
                .unwrap();
        assert!(deadline.is_none());

        let approved = approve_in_tx(&db, assignment_id, "auto").await.unwrap();
        assert!(approved.is_none());

        assert_eq!(status_of(&db, assignment_id).await, AssignmentStatus::Rejected);
        assert_eq!(balance_of(&db, user_id).await, Decimal::ZERO);
    }

    #[sqlx::test]
    async fn approved_assignments_cannot_be_rejected(db: PgPool) {
        let user_id = seed_user(&db).await;
        let (task_id, _) = seed_task(&db, dec!(12.5)).await;
        let assignment_id =
            seed_completed_assignment(&db, user_id, task_id, Utc::now() + Duration::minutes(10))
                .await;

        assert!(approve_in_tx(&db, assignment_id, "admin")
            .await
            .unwrap()
            .is_some());

        let rejected = reject_in_tx(&db, assignment_id, "admin", "Too late")
            .await
            .unwrap();
        assert!(!rejected);
        assert_eq!(status_of(&db, assignment_id).await, AssignmentStatus::Approved);
    }

    #[sqlx::test]
    async fn submitted_work_is_approved_and_credited(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user(&db).await;
        let (task_id, question_id) = seed_task(&db, dec!(35.5)).await;

        let Json(body) = start_assignment(
            State(state.clone()),
            Json(StartAssignmentRequest { user_id, task_id }),
        )
        .await
        .unwrap();
        assert_eq!(body["error"], json!(false));
        let assignment_id: Uuid = body["assignment"]["id"].as_str().unwrap().parse().unwrap();

        let mut answers = HashMap::new();
        answers.insert(
            question_id,
            SubmissionAnswer::Text {
                answer: "1GB costs 1000 TZS".to_string(),
            },
        );
        let before = Utc::now();
        let Json(body) = submit_assignment(
            State(state.clone()),
            Path(assignment_id),
            Json(SubmitAssignmentRequest { answers }),
        )
        .await
        .unwrap();
        assert_eq!(body["error"], json!(false));
        assert_eq!(body["assignment"]["status"], json!("completed"));

        let deadline: DateTime<Utc> = body["assignment"]["auto_approve_at"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(deadline >= before + Duration::minutes(5));
        assert!(deadline <= Utc::now() + Duration::minutes(20));

        let Json(body) = approve_assignment(State(state.clone()), Path(assignment_id), None)
            .await
            .unwrap();
        assert_eq!(body["status"], json!("approved"));
        assert_eq!(balance_of(&db, user_id).await, dec!(35.5));

        let err = approve_assignment(State(state), Path(assignment_id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));
        assert_eq!(balance_of(&db, user_id).await, dec!(35.5));
    }

    #[sqlx::test]
    async fn submission_without_required_answers_is_refused(db: PgPool) {
        let state = crate::AppState::for_tests(db.clone());
        let user_id = seed_user(&db).await;
        let (task_id, question_id) = seed_task(&db, dec!(20)).await;

        let Json(body) = start_assignment(
            State(state.clone()),
            Json(StartAssignmentRequest { user_id, task_id }),
        )
        .await
        .unwrap();
        let assignment_id: Uuid = body["assignment"]["id"].as_str().unwrap().parse().unwrap();

        let err = submit_assignment(
            State(state),
            Path(assignment_id),
            Json(SubmitAssignmentRequest {
                answers: HashMap::new(),
            }),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Validation(message) => {
                assert!(message.contains(&question_id.to_string()))
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(status_of(&db, assignment_id).await, AssignmentStatus::Active);
    }
}
