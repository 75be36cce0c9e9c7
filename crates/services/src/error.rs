//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use study_core::model::{ProgressError, SessionValidationError};

/// Errors emitted by the scheduling, progress, and statistics services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulingError {
    #[error(transparent)]
    Validation(#[from] SessionValidationError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by notification sinks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    #[error("webhook notifications are not configured")]
    Disabled,
    #[error("webhook request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
