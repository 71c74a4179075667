//! Error types for the contract pipeline.
//!
//! Every stage returns [`PlatformError`] on its primary result channel. Each
//! variant carries a kind, a machine-readable code and a numeric status so the
//! API layer can render it without inspecting variant identity.

use std::fmt;

use thiserror::Error;

use crate::lifecycle::ContractStatus;

/// Message returned to callers in place of internal error details.
pub const REDACTED_MESSAGE: &str = "An internal error occurred";

/// Coarse classification of a [`PlatformError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input
    Validation,
    /// Unknown contract identifier
    NotFound,
    /// Missing identity or ownership mismatch
    Authorization,
    /// Upload intake could not issue a credential
    UploadFailure,
    /// Text extraction failed or timed out
    ExtractionFailure,
    /// Language-model analysis failed
    AnalysisFailure,
    /// Metadata store read or write failed
    PersistenceFailure,
    /// Anything unanticipated
    Internal,
}

impl ErrorKind {
    /// Numeric HTTP-equivalent status for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::UploadFailure
            | Self::ExtractionFailure
            | Self::AnalysisFailure
            | Self::PersistenceFailure
            | Self::Internal => 500,
        }
    }

    /// True for errors caused by the caller rather than the system.
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(self, Self::Validation | Self::NotFound | Self::Authorization)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Authorization => "authorization",
            Self::UploadFailure => "upload_failure",
            Self::ExtractionFailure => "extraction_failure",
            Self::AnalysisFailure => "analysis_failure",
            Self::PersistenceFailure => "persistence_failure",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors that can occur anywhere in the contract pipeline.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Caller input failed validation
    #[error("{0}")]
    Validation(String),

    /// A stage was asked to move a contract along an edge the lifecycle forbids
    #[error("Cannot move contract from {from} to {to}")]
    InvalidTransition {
        /// Status currently stored on the record
        from: ContractStatus,
        /// Status the stage attempted to enter
        to: ContractStatus,
    },

    /// No record exists for the contract identifier
    #[error("Contract {0} not found")]
    NotFound(String),

    /// Missing identity or access to another user's contract
    #[error("{0}")]
    Authorization(String),

    /// Upload credential could not be issued
    #[error("{0}")]
    Upload(String),

    /// Text extraction failed
    #[error("{0}")]
    Extraction(String),

    /// Asynchronous extraction job never finished within the polling ceiling
    #[error("Text extraction job {job_id} timed out after {attempts} status checks")]
    ExtractionTimeout {
        /// Extraction service job identifier
        job_id: String,
        /// Number of status checks performed
        attempts: u32,
    },

    /// Language-model analysis failed
    #[error("{0}")]
    Analysis(String),

    /// Metadata store operation failed
    #[error("{0}")]
    Persistence(String),

    /// Unanticipated failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Classification used for dispatch.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Upload(_) => ErrorKind::UploadFailure,
            Self::Extraction(_) | Self::ExtractionTimeout { .. } => ErrorKind::ExtractionFailure,
            Self::Analysis(_) => ErrorKind::AnalysisFailure,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Machine-readable error code exposed to API callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::NotFound(_) => "DOCUMENT_NOT_FOUND",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Upload(_) => "DOCUMENT_UPLOAD_ERROR",
            Self::Extraction(_) => "TEXT_EXTRACTION_ERROR",
            Self::ExtractionTimeout { .. } => "TEXT_EXTRACTION_TIMEOUT",
            Self::Analysis(_) => "AI_ANALYSIS_ERROR",
            Self::Persistence(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Numeric HTTP-equivalent status.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ExtractionTimeout { .. } => 504,
            other => other.kind().status_code(),
        }
    }

    /// Message safe to show to a caller. Internal details are redacted.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => REDACTED_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }

    /// Wrap a collaborator error with stage context.
    pub fn extraction(context: &str, err: &anyhow::Error) -> Self {
        Self::Extraction(format!("{context}: {err:#}"))
    }

    /// Wrap a language-model failure with stage context.
    pub fn analysis(context: &str, err: &anyhow::Error) -> Self {
        Self::Analysis(format!("{context}: {err:#}"))
    }
}

/// Convenience type alias for Result with `PlatformError`
pub type Result<T> = std::result::Result<T, PlatformError>;

impl From<anyhow::Error> for PlatformError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {err}"))
    }
}
