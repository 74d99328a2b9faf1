use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A catalogue entry. Immutable once published except for the open/closed
/// flag, which only an administrator flips.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub reward: Decimal,
    pub duration_minutes: i32,
    pub difficulty: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
pub enum QuestionType {
    Text,
    SingleChoice,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub task_id: Uuid,
    pub position: i32,
    pub question_type: QuestionType,
    pub prompt: String,
    pub choices: Option<Vec<String>>,
    pub required: bool,
    pub accepted_formats: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TaskWithQuestions {
    #[serde(flatten)]
    pub task: Task,
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub reward: Decimal,
    #[validate(range(min = 1, max = 480))]
    pub duration_minutes: i32,
    #[validate(length(min = 1, max = 50))]
    pub difficulty: String,
    #[validate(length(min = 1))]
    pub questions: Vec<CreateQuestionRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateQuestionRequest {
    pub question_type: QuestionType,
    pub prompt: String,
    pub choices: Option<Vec<String>>,
    #[serde(default = "default_required")]
    pub required: bool,
    pub accepted_formats: Option<Vec<String>>,
}

fn default_required() -> bool {
    true
}

/// Catalogue listing filters. Category and price band are independent;
/// `cursor` is the id of the last task seen on the previous page.
#[derive(Debug, Deserialize)]
pub struct CatalogueQuery {
    pub category: Option<String>,
    pub min_reward: Option<Decimal>,
    pub max_reward: Option<Decimal>,
    pub cursor: Option<Uuid>,
}
