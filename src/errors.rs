use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::StateConflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::StateConflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InsufficientBalance => {
                (StatusCode::BAD_REQUEST, "Insufficient balance".to_string())
            }
            AppError::Gateway(err) => {
                tracing::error!("Gateway error: {}", err);
                (err.status_code(), err.public_message())
            }
        };

        let body = Json(json!({
            "error": true,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_map_to_conventional_status_codes() {
        assert_eq!(
            AppError::validation("bad phone").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::conflict("wrong state").into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::not_found("no such task").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InsufficientBalance.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Gateway(GatewayError::Timeout).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
