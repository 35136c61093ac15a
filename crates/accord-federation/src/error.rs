//! Error taxonomy for federation operations.

use accord_audit::AuditError;
use accord_types::{ErrorKind, OperationResult};
use thiserror::Error;

/// Errors returned by the partnership, credential and external partner
/// registries.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Malformed or missing input, or an ineligible target.
    #[error("{0}")]
    Validation(String),

    /// Unknown id, or one owned by another tenant. Both read the same.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Duplicate or already-resolved state.
    #[error("{0}")]
    Conflict(String),

    /// Missing role, wrong side of the partnership, or federation disabled.
    #[error("{0}")]
    Forbidden(String),

    /// A remote federation node could not be reached.
    #[error("partner unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FederationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::ExternalUnavailable(_) => ErrorKind::ExternalUnavailable,
            Self::Database(_)
            | Self::Pool(_)
            | Self::Serialization(_)
            | Self::Audit(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "an internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    /// Wraps the error in the `{success: false, error}` envelope, logging
    /// internal details first.
    pub fn into_operation_result<T>(self) -> OperationResult<T> {
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "federation operation failed");
        }
        OperationResult::failure(self.public_message())
    }
}

/// Converts an operation outcome into the result envelope.
pub fn to_operation_result<T>(result: Result<T, FederationError>) -> OperationResult<T> {
    match result {
        Ok(data) => OperationResult::ok(data),
        Err(e) => e.into_operation_result(),
    }
}

/// Whether `err` is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
