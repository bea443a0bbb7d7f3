//! Contact records and email identity rules.
//!
//! An email address is the identity of a contact: comparisons are
//! case-insensitive and ignore surrounding whitespace.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Display name used when a contact has none.
pub const DEFAULT_PLACEHOLDER_NAME: &str = "customer";

/// A single recipient as read from a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

impl Contact {
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// The normalised email used for de-duplication and suppression lookups.
    #[must_use]
    pub fn identity(&self) -> String {
        normalize_email(&self.email)
    }

    /// The contact's name, or `placeholder` when the name is blank.
    #[must_use]
    pub fn display_name<'a>(&'a self, placeholder: &'a str) -> &'a str {
        let name = self.name.trim();
        if name.is_empty() { placeholder } else { name }
    }

    /// Split the email into local part and domain after the shape check.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] describing the first shape rule violated.
    pub fn parts(&self) -> Result<EmailParts<'_>, AddressError> {
        EmailParts::parse(&self.email)
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Trim and lower-case an address.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The two halves of an address that passed the shape check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailParts<'a> {
    pub local: &'a str,
    pub domain: &'a str,
}

impl<'a> EmailParts<'a> {
    /// Minimal shape check: one `@`, a non-empty local part and a dotted
    /// domain, with no whitespace anywhere.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as an [`AddressError`].
    pub fn parse(email: &'a str) -> Result<Self, AddressError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AddressError::Empty);
        }

        if email.chars().any(char::is_whitespace) {
            return Err(AddressError::Whitespace(email.to_string()));
        }

        let Some((local, domain)) = email.split_once('@') else {
            return Err(AddressError::AtSign(email.to_string()));
        };

        if domain.contains('@') {
            return Err(AddressError::AtSign(email.to_string()));
        }

        if local.is_empty() {
            return Err(AddressError::EmptyLocalPart(email.to_string()));
        }

        if domain.is_empty() {
            return Err(AddressError::MissingDomain(email.to_string()));
        }

        if !domain.contains('.') {
            return Err(AddressError::UndottedDomain(email.to_string()));
        }

        Ok(Self { local, domain })
    }
}

/// Cheap shape check without keeping the parts.
#[must_use]
pub fn is_valid_shape(email: &str) -> bool {
    EmailParts::parse(email).is_ok()
}
