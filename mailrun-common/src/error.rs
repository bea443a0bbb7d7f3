//! Error types for the mailrun-common crate.

use thiserror::Error;

/// Reasons an email address fails the minimal shape check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address is empty after trimming.
    #[error("Address is empty")]
    Empty,

    /// The address contains whitespace.
    #[error("Address contains whitespace: {0}")]
    Whitespace(String),

    /// The address does not contain exactly one `@`.
    #[error("Address must contain exactly one '@': {0}")]
    AtSign(String),

    /// Nothing precedes the `@`.
    #[error("Address has an empty local part: {0}")]
    EmptyLocalPart(String),

    /// The part after the `@` is empty.
    #[error("Address has no domain: {0}")]
    MissingDomain(String),

    /// The domain part has no `.`.
    #[error("Address domain has no '.': {0}")]
    UndottedDomain(String),
}
