use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle of one user's attempt at one task.
///
/// `active -> completed -> {approved, rejected}`; the terminal states never
/// transition again. Records are kept as an audit trail, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub status: AssignmentStatus,
    pub submission_data: Option<Json<HashMap<Uuid, SubmissionAnswer>>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

/// One answer in a submission, keyed by question id. File questions record
/// upload metadata only; the blob itself lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SubmissionAnswer {
    #[serde(rename = "text")]
    Text { answer: String },
    #[serde(rename = "single-choice")]
    SingleChoice { answer: String },
    #[serde(rename = "file", rename_all = "camelCase")]
    File {
        file_name: String,
        file_type: String,
        file_size: i64,
    },
}

#[derive(Debug, Deserialize)]
pub struct StartAssignmentRequest {
    pub user_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAssignmentRequest {
    pub answers: HashMap<Uuid, SubmissionAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct RejectAssignmentRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentListQuery {
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submission_answer_wire_format_round_trips() {
        let text: SubmissionAnswer =
            serde_json::from_value(json!({"type": "text", "answer": "Dar es Salaam"})).unwrap();
        assert_eq!(
            text,
            SubmissionAnswer::Text {
                answer: "Dar es Salaam".to_string()
            }
        );

        let file: SubmissionAnswer = serde_json::from_value(json!({
            "type": "file",
            "fileName": "receipt.pdf",
            "fileType": "application/pdf",
            "fileSize": 2048
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&file).unwrap()["fileName"],
            json!("receipt.pdf")
        );
    }
}
