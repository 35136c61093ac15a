//! Error types for the audit trail.

/// Errors that can occur while writing, reading or exporting audit entries.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A database operation failed.
    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Metadata could not be serialised or parsed.
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The tabular encoder failed.
    #[error("audit export error: {0}")]
    Export(#[from] csv::Error),

    /// Flushing export output failed.
    #[error("audit export io error: {0}")]
    Io(#[from] std::io::Error),

    /// A filter combination that cannot be evaluated.
    #[error("invalid audit filter: {0}")]
    InvalidFilter(String),
}
