//! Typed errors for the validation stages.
//!
//! Per-contact problems never surface here: they become rejection records
//! or captured reputation failures. These errors describe failures of the
//! collaborators themselves.

use thiserror::Error;

/// Errors while loading the suppression snapshot.
#[derive(Debug, Error)]
pub enum SuppressionError {
    /// The HTTP request could not be completed.
    #[error("Suppression source request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("Suppression source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A local suppression file could not be read.
    #[error("Suppression file error: {0}")]
    Io(#[from] std::io::Error),

    /// The source handed back a continuation token it already issued.
    #[error("Suppression source repeated continuation token: {0}")]
    RepeatedToken(String),
}

/// Errors from the third-party reputation service.
#[derive(Debug, Error)]
pub enum ReputationError {
    /// The HTTP request could not be completed.
    #[error("Reputation request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Reputation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be interpreted.
    #[error("Unexpected reputation response: {0}")]
    Decode(String),
}

impl ReputationError {
    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Setup errors that abort a validation run before any contact is examined.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The suppression snapshot could not be loaded.
    #[error("Failed to load suppression list: {0}")]
    Suppression(#[from] SuppressionError),

    /// Full validation was requested without a suppression source.
    #[error("Full validation requires a suppression source")]
    MissingSuppressionSource,
}
