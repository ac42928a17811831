//! Error taxonomy for the report core.
//!
//! Collaborator failures are wrapped at the boundary where they occur:
//! dataset loading, aggregation and export become [`ReportError::Execution`],
//! channel failures become [`ReportError::Delivery`].

use thiserror::Error;

/// Core error type for report execution, scheduling and delivery.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Unknown report, schedule, subscription or execution id.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A definition or input is missing a required field or is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A pipeline stage (load, aggregate, export) failed.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A delivery channel rejected or failed to hand off an artifact.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The execution was cancelled before it completed.
    #[error("Execution '{execution_id}' was cancelled")]
    Cancelled { execution_id: String },

    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, ReportError>;

impl ReportError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery(message.into())
    }

    /// Whether this error is a `NotFound` variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a `Validation` variant.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(anyhow::Error::new(err).context("Failed to (de)serialize record"))
    }
}
