//! Shared building blocks for the mailrun campaign tools.
//!
//! - [`contact`]: the `Contact` record and email identity rules
//! - [`domain`]: the `Domain` newtype used as a cache key
//! - [`logging`]: subscriber initialisation and logging macros

pub mod contact;
pub mod domain;
pub mod error;
pub mod logging;

pub use contact::{Contact, EmailParts};
pub use domain::Domain;
pub use error::AddressError;
pub use tracing;
