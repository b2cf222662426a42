//! Application-wide error types and their HTTP mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use foodbridge_core::{Error as CoreError, StoreError};
use thiserror::Error;

use crate::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Body or query string that could not be extracted.
    #[error("Invalid request: {message}")]
    Extract { status: StatusCode, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, DispatcherError>;

impl From<JsonRejection> for DispatcherError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Extract {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for DispatcherError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Extract {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl DispatcherError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Extract { status, .. } => *status,
            Self::Core(CoreError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Core(
                CoreError::PostingNotFound(_)
                | CoreError::UserNotFound(_)
                | CoreError::NotificationNotFound(_)
                | CoreError::Store(StoreError::NotFound),
            ) => StatusCode::NOT_FOUND,
            Self::Core(CoreError::Store(StoreError::Conflict { .. } | StoreError::Duplicate(_))) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatcherError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
