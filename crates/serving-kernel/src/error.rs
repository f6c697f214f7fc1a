use serving_plane::{PermissionError, QueryError, StoreError};
use thiserror::Error;
use uuid::Uuid;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum ServingError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("backend provisioning error: {0}")]
    Provisioning(#[source] DriverError),
    #[error("permission service error: {0}")]
    Permission(#[source] PermissionError),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    #[error("sink cleanup error: {0}")]
    Sink(String),
}

impl From<StoreError> for ServingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Query(err) => ServingError::Validation(err.to_string()),
            other => ServingError::Store(other),
        }
    }
}

impl From<QueryError> for ServingError {
    fn from(err: QueryError) -> Self {
        ServingError::Validation(err.to_string())
    }
}

impl From<PermissionError> for ServingError {
    fn from(err: PermissionError) -> Self {
        ServingError::Permission(err)
    }
}

impl From<DriverError> for ServingError {
    fn from(err: DriverError) -> Self {
        ServingError::Provisioning(err)
    }
}

/// Result of a single delete. A missing row yields `deleted == false` with no
/// errors; `errors` carries failures that happened after the row was gone.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub errors: Vec<ServingError>,
}

impl DeleteOutcome {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Default)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
    pub failed: Vec<(Uuid, ServingError)>,
}

impl BatchDeleteOutcome {
    /// `Partial` maps to a multi-status response at the HTTP boundary.
    pub fn status(&self) -> BatchStatus {
        match (self.deleted.is_empty(), self.failed.is_empty()) {
            (_, true) => BatchStatus::Complete,
            (true, false) => BatchStatus::Failed,
            (false, false) => BatchStatus::Partial,
        }
    }
}
