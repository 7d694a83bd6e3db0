use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the session/answer/grading workflow.
///
/// Every variant carries the identifiers needed to act on it; nothing in the
/// core is swallowed or retried, storage faults surface as `StorageUnavailable`.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("test {test_id} was not launched: {available} valid questions in the bank, {required} required")]
    InsufficientQuestions {
        test_id: i64,
        available: usize,
        required: usize,
    },

    #[error("student '{student_id}' already has an open attempt for session '{session_id}'")]
    AlreadyActive {
        session_id: String,
        student_id: String,
    },

    #[error("student '{student_id}' already submitted answers for session '{session_id}'")]
    AlreadySubmitted {
        session_id: String,
        student_id: String,
    },

    #[error("student '{student_id}' has no open attempt for session '{session_id}'")]
    NoPendingSubmission {
        session_id: String,
        student_id: String,
    },

    #[error("session '{session_id}' no longer accepts submissions")]
    SessionClosed { session_id: String },

    #[error("malformed answers for session '{session_id}': {reason}")]
    MalformedAnswers { session_id: String, reason: String },

    #[error("invalid question '{question_id}': {reason}")]
    InvalidQuestion { question_id: String, reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("access denied: role '{required}' required")]
    Forbidden { required: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl QuizError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        QuizError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short machine-readable code, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::NotFound { .. } => "not_found",
            QuizError::InsufficientQuestions { .. } => "insufficient_questions",
            QuizError::AlreadyActive { .. } => "already_active",
            QuizError::AlreadySubmitted { .. } => "already_submitted",
            QuizError::NoPendingSubmission { .. } => "no_pending_submission",
            QuizError::SessionClosed { .. } => "session_closed",
            QuizError::MalformedAnswers { .. } => "malformed_answers",
            QuizError::InvalidQuestion { .. } => "invalid_question",
            QuizError::InvalidRequest { .. } => "invalid_request",
            QuizError::Forbidden { .. } => "forbidden",
            QuizError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            QuizError::NotFound { .. } => StatusCode::NOT_FOUND,
            QuizError::InsufficientQuestions { .. } | QuizError::InvalidQuestion { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            QuizError::AlreadyActive { .. }
            | QuizError::AlreadySubmitted { .. }
            | QuizError::NoPendingSubmission { .. } => StatusCode::CONFLICT,
            QuizError::SessionClosed { .. } => StatusCode::GONE,
            QuizError::MalformedAnswers { .. } | QuizError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            QuizError::Forbidden { .. } => StatusCode::FORBIDDEN,
            QuizError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for QuizError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let QuizError::StorageUnavailable(ref detail) = self {
            tracing::error!("Storage failure: {}", detail);
        }

        let body = Json(json!({
            "status": status.as_u16(),
            "error": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<mongodb::error::Error> for QuizError {
    fn from(err: mongodb::error::Error) -> Self {
        QuizError::StorageUnavailable(format!("MongoDB error: {}", err))
    }
}

impl From<redis::RedisError> for QuizError {
    fn from(err: redis::RedisError) -> Self {
        QuizError::StorageUnavailable(format!("Redis error: {}", err))
    }
}

impl From<serde_json::Error> for QuizError {
    fn from(err: serde_json::Error) -> Self {
        QuizError::StorageUnavailable(format!("Corrupted stored document: {}", err))
    }
}

impl From<mongodb::bson::ser::Error> for QuizError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        QuizError::StorageUnavailable(format!("BSON serialization failed: {}", err))
    }
}
