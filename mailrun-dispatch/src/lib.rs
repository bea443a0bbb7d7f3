//! Bulk mail dispatch for mailrun
//!
//! This crate provides:
//! - The [`Transport`] seam and an HTTP implementation for an SES-style
//!   bulk-email API
//! - Stored template loading and registration
//! - The [`BatchDispatcher`], which sends paced batches strictly in order and
//!   reconciles per-recipient results
//! - The [`ReportWriter`] for timestamped send reports

mod dispatcher;
mod error;
mod report;
mod template;
mod transport;

pub use dispatcher::{
    BatchDispatcher, DispatchConfig, DispatchOutcome, DispatchStatus, DispatchSummary,
    pacing_delay,
};
pub use error::{ReportError, TransportError};
pub use report::{REPORT_HEADER, ReportWriter};
pub use template::{EmailTemplate, TemplateConfig};
pub use transport::{
    BulkEntry, BulkSendRequest, EntryResult, HttpTransport, TemplateCreation, TemplateData,
    Transport, TransportConfig,
};
