//! The result envelope returned by federation operations.

use serde::{Deserialize, Serialize};

/// Coarse classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Unknown id, or an id owned by another tenant.
    NotFound,
    /// Duplicate or already-resolved state.
    Conflict,
    /// Actor lacks the role or tenant ownership required.
    Forbidden,
    /// A remote federation node could not be reached.
    ExternalUnavailable,
    /// Unexpected storage or runtime failure.
    Internal,
}

/// `{success, error?, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    /// A successful result carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    /// A failed result with a caller-facing message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// A failed result that still carries data, e.g. a connectivity report.
    pub fn failure_with(message: impl Into<String>, data: T) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: Some(data),
        }
    }
}
