use axum::http::StatusCode;
use thiserror::Error;

use crate::models::ContentRef;

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i32 },

    #[error("content {content} cannot be assigned: {reason}")]
    ContentNotApproved { content: ContentRef, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    /// A stored row no longer decodes into the domain model.
    #[error("corrupt {kind} record {id}: {detail}")]
    CorruptRecord {
        kind: &'static str,
        id: i32,
        detail: String,
    },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl ScheduleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ScheduleError::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: i32) -> Self {
        ScheduleError::NotFound { kind, id }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScheduleError::Validation(_) => StatusCode::BAD_REQUEST,
            ScheduleError::NotFound { .. } => StatusCode::NOT_FOUND,
            ScheduleError::Forbidden(_) | ScheduleError::ContentNotApproved { .. } => {
                StatusCode::FORBIDDEN
            }
            ScheduleError::CollaboratorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScheduleError::InvalidTimezone(_)
            | ScheduleError::CorruptRecord { .. }
            | ScheduleError::Database(_)
            | ScheduleError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Logs server-side failures and returns the status to send back.
    pub fn into_status(self) -> StatusCode {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        status
    }
}
