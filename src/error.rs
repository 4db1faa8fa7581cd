//! Error types for the cycle ledger

use serde::Serialize;
use thiserror::Error;

/// Structured error as seen by API clients and the reply composer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    pub message: String,
}

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {

    // =============================
    // Domain Errors
    // =============================

    #[error("cycleId is missing or is not a positive integer")]
    InvalidId,

    #[error("Cycle {0} already exists")]
    AlreadyExists(u64),

    #[error("Cycle {0} not found")]
    NotFound(u64),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    ValidationFailed {
        field: &'static str,
        reason: String,
    },

    #[error("Cannot estimate yet, missing: {}", .0.join(", "))]
    PrerequisiteMissing(Vec<&'static str>),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Ledger file is corrupt: {0}")]
    CorruptStore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LedgerError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, used by the API envelope and reply composer
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidId => "invalid_id",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::MissingField(_) => "missing_field",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::PrerequisiteMissing(_) => "prerequisite_missing",
            Self::CorruptStore(_) => "corrupt_store",
            Self::Storage(_) | Self::IoError(_) => "storage",
            Self::SerializationError(_) => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// The input field this error is about, when there is one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidId => Some("cycleId"),
            Self::MissingField(field) => Some(field),
            Self::ValidationFailed { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            field: self.field(),
            message: self.to_string(),
        }
    }

    /// True for errors caused by the caller's input rather than the process
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::InvalidId
                | Self::AlreadyExists(_)
                | Self::NotFound(_)
                | Self::MissingField(_)
                | Self::ValidationFailed { .. }
                | Self::PrerequisiteMissing(_)
        )
    }
}
