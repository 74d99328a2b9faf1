use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::domain::CATALOGUE_PAGE_SIZE;
use crate::errors::AppError;
use crate::models::{CatalogueQuery, CreateTaskRequest, Question, QuestionType, Task, TaskWithQuestions};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/:id", get(get_task))
}

/// Administrator-only catalogue operations; mounted behind the admin guard.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_task))
        .route("/:id", delete(delete_task))
        .route("/:id/close", post(close_task))
        .route("/:id/reopen", post(reopen_task))
}

/// Open tasks, filterable by category and price band, keyset-paginated by
/// the last-seen task id.
async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<CatalogueQuery>,
) -> Result<Json<Value>, AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, title, category, reward, duration_minutes, difficulty, is_active, created_at \
         FROM tasks WHERE is_active = TRUE",
    );

    if let Some(category) = &params.category {
        builder.push(" AND category = ");
        builder.push_bind(category);
    }
    if let Some(min_reward) = params.min_reward {
        builder.push(" AND reward >= ");
        builder.push_bind(min_reward);
    }
    if let Some(max_reward) = params.max_reward {
        builder.push(" AND reward <= ");
        builder.push_bind(max_reward);
    }

    if let Some(cursor) = params.cursor {
        let anchor: Option<Task> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(cursor)
            .fetch_optional(&state.db)
            .await?;
        let anchor = anchor
            .ok_or_else(|| AppError::validation("Unknown pagination cursor"))?;
        builder.push(" AND (created_at, id) < (");
        builder.push_bind(anchor.created_at);
        builder.push(", ");
        builder.push_bind(anchor.id);
        builder.push(")");
    }

    builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    builder.push_bind(CATALOGUE_PAGE_SIZE);

    let tasks: Vec<Task> = builder.build_query_as().fetch_all(&state.db).await?;

    let next_cursor = if tasks.len() as i64 == CATALOGUE_PAGE_SIZE {
        tasks.last().map(|t| t.id)
    } else {
        None
    };

    Ok(Json(json!({
        "error": false,
        "tasks": tasks,
        "next_cursor": next_cursor
    })))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let task: Task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Task not found"))?;

    let questions: Vec<Question> =
        sqlx::query_as("SELECT * FROM questions WHERE task_id = $1 ORDER BY position")
            .bind(id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(json!({
        "error": false,
        "task": TaskWithQuestions { task, questions }
    })))
}

async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<Json<Value>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::validation(format!("Validation error: {}", e)))?;

    if payload.reward <= rust_decimal::Decimal::ZERO {
        return Err(AppError::validation("Task reward must be positive"));
    }

    for (idx, question) in payload.questions.iter().enumerate() {
        if question.prompt.trim().is_empty() {
            return Err(AppError::validation(format!(
                "Question {} has an empty prompt",
                idx + 1
            )));
        }
        if question.question_type == QuestionType::SingleChoice
            && question.choices.as_ref().map_or(true, |c| c.is_empty())
        {
            return Err(AppError::validation(format!(
                "Question {} is single-choice but has no choices",
                idx + 1
            )));
        }
    }

    let mut tx = state.db.begin().await?;

    let task: Task = sqlx::query_as(
        r#"
        INSERT INTO tasks (title, category, reward, duration_minutes, difficulty)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, title, category, reward, duration_minutes, difficulty, is_active, created_at
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.category)
    .bind(payload.reward)
    .bind(payload.duration_minutes)
    .bind(&payload.difficulty)
    .fetch_one(&mut *tx)
    .await?;

    let mut questions = Vec::with_capacity(payload.questions.len());
    for (position, question) in payload.questions.iter().enumerate() {
        let inserted: Question = sqlx::query_as(
            r#"
            INSERT INTO questions (task_id, position, question_type, prompt, choices, required, accepted_formats)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, task_id, position, question_type, prompt, choices, required, accepted_formats
            "#,
        )
        .bind(task.id)
        .bind(position as i32)
        .bind(question.question_type)
        .bind(&question.prompt)
        .bind(&question.choices)
        .bind(question.required)
        .bind(&question.accepted_formats)
        .fetch_one(&mut *tx)
        .await?;
        questions.push(inserted);
    }

    tx.commit().await?;

    tracing::info!("Created task {} ({})", task.id, task.title);

    Ok(Json(json!({
        "error": false,
        "task": TaskWithQuestions { task, questions }
    })))
}

/// Deleting is blocked while any assignment references the task; closed
/// tasks with history stay in the catalogue as an audit trail.
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let referenced: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM assignments WHERE task_id = $1)")
            .bind(id)
            .fetch_one(&state.db)
            .await?;

    if referenced {
        return Err(AppError::conflict(
            "Task has submissions and cannot be deleted; close it instead",
        ));
    }

    let deleted = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Task not found"));
    }

    Ok(Json(json!({ "error": false, "deleted": true })))
}

async fn close_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    set_task_active(&state, id, false).await
}

async fn reopen_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    set_task_active(&state, id, true).await
}

async fn set_task_active(state: &AppState, id: Uuid, is_active: bool) -> Result<Json<Value>, AppError> {
    let updated = sqlx::query("UPDATE tasks SET is_active = $1 WHERE id = $2")
        .bind(is_active)
        .bind(id)
        .execute(&state.db)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Task not found"));
    }

    Ok(Json(json!({ "error": false, "is_active": is_active })))
}
