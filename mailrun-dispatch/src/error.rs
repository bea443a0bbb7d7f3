//! Typed errors for dispatch operations.
//!
//! A [`TransportError`] for one batch never aborts a dispatch run: it is
//! folded into `FAILURE` outcomes for every recipient of that batch. Only
//! [`ReportError`] and template creation failures reach the operator.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the bulk-mail transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be completed.
    #[error("Transport request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The transport answered with a non-success status.
    #[error("Transport returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The transport rejected the request as malformed or unauthorised.
    #[error("Transport rejected request: {0}")]
    Rejected(String),

    /// Template data could not be encoded for the request.
    #[error("Failed to encode template data: {0}")]
    Encode(#[from] serde_json::Error),

    /// The response body could not be interpreted.
    #[error("Unexpected transport response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` if resending the same batch later may succeed.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rejected(_) | Self::Encode(_) | Self::Decode(_) => false,
        }
    }
}

/// Errors while writing a send report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report directory or file could not be created.
    #[error("Failed to create report {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row could not be serialised.
    #[error("Failed to write report row: {0}")]
    Csv(#[from] csv::Error),

    /// The report could not be flushed to disk.
    #[error("Failed to flush report: {0}")]
    Io(#[from] std::io::Error),

    /// No free report name was found for the current timestamp.
    #[error("Report name collision for {0}")]
    Collision(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_temporary() {
        let throttled = TransportError::Status {
            status: 429,
            body: "slow down".to_string(),
        };
        let server = TransportError::Status {
            status: 502,
            body: String::new(),
        };
        let forbidden = TransportError::Status {
            status: 403,
            body: String::new(),
        };

        assert!(throttled.is_temporary());
        assert!(server.is_temporary());
        assert!(!forbidden.is_temporary());
        assert!(!TransportError::Rejected("no sender".to_string()).is_temporary());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status {
            status: 503,
            body: "Service Unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Transport returned HTTP 503: Service Unavailable"
        );
    }
}
