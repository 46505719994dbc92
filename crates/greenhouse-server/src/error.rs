//! Errors returned to HTTP and channel clients

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use greenhouse_core::OccupancyError;
use greenhouse_db::DbError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{message}")]
    MissingArguments { message: String },

    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("{message}")]
    NotFound { tag: String, message: String },

    #[error("{message}")]
    OutOfRange { tag: String, message: String },

    #[error("{message}")]
    Rejected { tag: String, message: String },

    #[error("{message}")]
    InvalidCredentials { message: String },

    #[error("{message}")]
    InsufficientPermissions { message: String },

    #[error("{message}")]
    AlreadyExists { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("Something went wrong")]
    Unexpected { details: String },
}

/// Wire form of an error: `{error, message, details?}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn missing(message: impl Into<String>) -> Self {
        ApiError::MissingArguments {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidArgument {
            message: message.into(),
        }
    }

    /// `No records` error used by the read endpoints
    pub fn no_records(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            tag: "No records".to_string(),
            message: message.into(),
        }
    }

    pub fn unexpected(details: impl ToString) -> Self {
        ApiError::Unexpected {
            details: details.to_string(),
        }
    }

    /// Stable tag exposed as `error`
    pub fn tag(&self) -> &str {
        match self {
            ApiError::MissingArguments { .. } => "Missing arguments",
            ApiError::InvalidArgument { .. } => "Invalid argument",
            ApiError::NotFound { tag, .. }
            | ApiError::OutOfRange { tag, .. }
            | ApiError::Rejected { tag, .. } => tag,
            ApiError::InvalidCredentials { .. } => "Invalid credentials",
            ApiError::InsufficientPermissions { .. } => "Insufficient permissions",
            ApiError::AlreadyExists { .. } => "Already exists",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::Unexpected { .. } => "Unexpected error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingArguments { .. }
            | ApiError::InvalidArgument { .. }
            | ApiError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
            ApiError::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            ApiError::Rejected { .. } | ApiError::AlreadyExists { .. } | ApiError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            ApiError::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match self {
            ApiError::Unexpected { details } => Some(details.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.tag().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Unexpected { details } = &self {
            tracing::error!(%details, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<OccupancyError> for ApiError {
    fn from(err: OccupancyError) -> Self {
        if let OccupancyError::TooManySlots { .. } = err {
            return ApiError::invalid(err.to_string());
        }
        let tag = err.tag().to_string();
        let message = err.to_string();
        if err.is_out_of_range() {
            ApiError::OutOfRange { tag, message }
        } else {
            ApiError::Rejected { tag, message }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(name) => ApiError::Conflict {
                message: format!("Module {name} was modified by another request, please retry"),
            },
            other => ApiError::unexpected(other),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
