//! Persistence layer for the greenhouse dashboard
//!
//! Collections are SQLite tables reached through an sqlx pool. Nested
//! documents (occupancy-rate modules, FarmBot sum-up arrays) are stored as
//! JSON text; occupancy modules carry a version column so concurrent
//! writers are detected instead of silently overwriting each other.

pub mod client;
pub mod queries;
pub mod schema;

pub use client::*;
pub use schema::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Document {0} was modified concurrently")]
    Conflict(String),

    #[error("Malformed document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

pub type DbResult<T> = Result<T, DbError>;
