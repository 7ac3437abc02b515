use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

use crate::ids::{ConversationId, UserId};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    #[error("user {0} cannot take part in conversations")]
    InvalidParticipant(UserId),

    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("user {0} is not a participant of this conversation")]
    NotAParticipant(UserId),

    #[error("not authorized")]
    NotAuthorized,

    #[error("missing caller identity")]
    Unauthenticated,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::SelfConversation => StatusCode::BAD_REQUEST,
            AppError::InvalidParticipant(_)
            | AppError::ConversationNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotAParticipant(_) | AppError::NotAuthorized => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Config(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Busy or locked database and pool exhaustion; worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::PoolTimedOut) => true,
            AppError::Database(sqlx::Error::Database(e)) => {
                // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
                matches!(e.code().as_deref(), Some("5" | "6" | "261" | "517"))
            }
            _ => false,
        }
    }

    /// Message safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_owned(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
