//! Contact list validation for mailrun
//!
//! This crate provides:
//! - Domain deliverability probing (MX with optional A/AAAA fallback) with a
//!   per-run verdict cache, per-attempt timeouts and bounded retries
//! - A suppression snapshot loaded once per run from a paginated source
//! - The ordered list validator (syntax, domain, deliverability, suppression,
//!   duplicates)
//! - The optional third-party reputation stage with a bounded worker pool

mod cache;
mod dns;
mod error;
mod prober;
pub mod reputation;
mod suppression;
mod validator;

pub use cache::{DomainCache, DomainVerdict, ProbeMethod};
pub use dns::{
    DnsError, DomainPolicy, HickoryMailResolver, MailResolver, ProbeConfig, RecordKind,
    normalize_domain,
};
pub use error::{ReputationError, SuppressionError, ValidationError};
pub use prober::DeliverabilityProber;
pub use suppression::{
    DEFAULT_PAGE_SIZE, FileSuppressionSource, HttpSuppressionSource, SuppressionFilter,
    SuppressionPage, SuppressionSnapshot, SuppressionSource,
};
pub use validator::{
    ListValidator, RejectionReason, RejectionRecord, ValidationMode, ValidationOutcome,
    ValidationRun,
};
