//! Rate-limited batch dispatch.
//!
//! Contacts are cut into consecutive batches and sent strictly one batch at
//! a time. After every batch the dispatcher sleeps for
//! `ceil(batch_len * 1000 / rate_per_second)` milliseconds, so sustained
//! throughput never exceeds the configured rate whatever the transport
//! latency. A batch whose transport call fails is recorded as `FAILURE` for
//! each of its recipients and followed by a fixed backoff.
//!
//! Every contact yields exactly one [`DispatchOutcome`], in input order.

use std::{fmt, sync::Arc, time::Duration};

use mailrun_common::{
    Contact,
    contact::DEFAULT_PLACEHOLDER_NAME,
    internal,
    tracing::{error, warn},
};
use serde::{Deserialize, Serialize};

use crate::transport::{BulkEntry, BulkSendRequest, EntryResult, TemplateData, Transport};

/// Configuration for the batch dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum recipients per transport call.
    ///
    /// Default: 50
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Target sustained throughput, in messages per second.
    ///
    /// Default: 20
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: u32,

    /// Synthesize `DRY_RUN` outcomes instead of calling the transport.
    ///
    /// Default: `false`
    #[serde(default)]
    pub dry_run: bool,

    /// Pause after a batch whose transport call failed, in milliseconds.
    ///
    /// Default: 3000
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,

    /// Display name of the sender.
    #[serde(default)]
    pub sender_name: String,

    /// Address the campaign is sent from.
    #[serde(default)]
    pub sender_address: String,

    /// Optional configuration set passed through to the transport.
    #[serde(default)]
    pub configuration_set: Option<String>,

    /// Template placeholder that receives each recipient's name.
    ///
    /// Default: `name`
    #[serde(default = "default_name_placeholder")]
    pub name_placeholder: String,

    /// Name used for recipients without one.
    ///
    /// Default: `customer`
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,

    /// Campaign-wide placeholder values (links, image URLs, support
    /// channels) sent with every recipient.
    #[serde(default)]
    pub template_data: TemplateData,
}

const fn default_batch_size() -> usize {
    50
}

const fn default_rate_per_second() -> u32 {
    20
}

const fn default_failure_backoff_ms() -> u64 {
    3000
}

fn default_name_placeholder() -> String {
    "name".to_string()
}

fn default_placeholder_name() -> String {
    DEFAULT_PLACEHOLDER_NAME.to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            rate_per_second: default_rate_per_second(),
            dry_run: false,
            failure_backoff_ms: default_failure_backoff_ms(),
            sender_name: String::new(),
            sender_address: String::new(),
            configuration_set: None,
            name_placeholder: default_name_placeholder(),
            placeholder_name: default_placeholder_name(),
            template_data: TemplateData::new(),
        }
    }
}

impl DispatchConfig {
    /// The sender rendered as `Name <address>`, or the bare address when no
    /// name is configured.
    #[must_use]
    pub fn sender(&self) -> String {
        let name = self.sender_name.trim();
        let address = self.sender_address.trim();
        if name.is_empty() {
            address.to_string()
        } else {
            format!("{name} <{address}>")
        }
    }

    #[must_use]
    pub const fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

/// Delay after a batch of `batch_len` recipients at `rate_per_second`.
///
/// A rate of zero is treated as one message per second.
#[must_use]
pub fn pacing_delay(batch_len: usize, rate_per_second: u32) -> Duration {
    let rate = u64::from(rate_per_second.max(1));
    let batch_len = u64::try_from(batch_len).unwrap_or(u64::MAX);
    Duration::from_millis(batch_len.saturating_mul(1000).div_ceil(rate))
}

/// Per-recipient dispatch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Success,
    Failure,
    DryRun,
    /// The transport's result list ended before this recipient.
    Unknown,
}

impl DispatchStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::DryRun => "DRY_RUN",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub email: String,
    pub name: String,
    pub status: DispatchStatus,
    pub message_id: Option<String>,
    pub error_message: Option<String>,
}

impl DispatchOutcome {
    fn new(contact: &Contact, status: DispatchStatus) -> Self {
        Self {
            email: contact.email.clone(),
            name: contact.name.clone(),
            status,
            message_id: None,
            error_message: None,
        }
    }

    fn failure(contact: &Contact, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(contact, DispatchStatus::Failure)
        }
    }

    fn from_entry(contact: &Contact, entry: EntryResult) -> Self {
        if entry.is_success() {
            return Self {
                message_id: entry.message_id.filter(|id| !id.is_empty()),
                ..Self::new(contact, DispatchStatus::Success)
            };
        }

        let message = entry
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| format!("Transport status {}", entry.status));

        Self {
            message_id: entry.message_id.filter(|id| !id.is_empty()),
            ..Self::failure(contact, message)
        }
    }
}

/// Outcomes of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// One per input contact, in input order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Number of batches attempted.
    pub batches: usize,
    /// Batches whose transport call failed as a whole.
    pub failed_batches: usize,
}

impl DispatchSummary {
    #[must_use]
    pub fn count(&self, status: DispatchStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Sends contacts through a [`Transport`] one paced batch at a time.
pub struct BatchDispatcher {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    template_name: String,
}

impl BatchDispatcher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            config,
            template_name: template_name.into(),
        }
    }

    /// Dispatch every contact, returning one outcome per contact.
    ///
    /// Never fails: transport errors are recorded against the recipients of
    /// the affected batch.
    pub async fn dispatch(&self, contacts: &[Contact]) -> DispatchSummary {
        let batch_size = self.config.batch_size.max(1);
        let total_batches = contacts.len().div_ceil(batch_size);
        let mut summary = DispatchSummary {
            outcomes: Vec::with_capacity(contacts.len()),
            ..DispatchSummary::default()
        };

        internal!(
            level = INFO,
            "Dispatching {} contact(s) in {total_batches} batch(es) of up to {batch_size}{}",
            contacts.len(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        for (index, batch) in contacts.chunks(batch_size).enumerate() {
            let number = index + 1;
            summary.batches += 1;

            if self.config.dry_run {
                internal!(
                    level = INFO,
                    "Batch {number}/{total_batches}: {} recipient(s) not sent (dry run)",
                    batch.len()
                );
                summary
                    .outcomes
                    .extend(batch.iter().map(|c| DispatchOutcome::new(c, DispatchStatus::DryRun)));
            } else {
                let request = self.build_request(batch);

                match self.transport.send_bulk(&request).await {
                    Ok(results) => {
                        let outcomes = reconcile(number, batch, results);
                        let sent = outcomes
                            .iter()
                            .filter(|o| o.status == DispatchStatus::Success)
                            .count();
                        internal!(
                            level = INFO,
                            "Batch {number}/{total_batches} sent: {sent}/{} succeeded",
                            batch.len()
                        );
                        summary.outcomes.extend(outcomes);
                    }
                    Err(err) => {
                        error!(
                            batch = number,
                            recipients = batch.len(),
                            temporary = err.is_temporary(),
                            error = %err,
                            "Batch send failed"
                        );
                        let message = err.to_string();
                        summary
                            .outcomes
                            .extend(batch.iter().map(|c| DispatchOutcome::failure(c, message.clone())));
                        summary.failed_batches += 1;

                        tokio::time::sleep(self.config.failure_backoff()).await;
                    }
                }
            }

            tokio::time::sleep(pacing_delay(batch.len(), self.config.rate_per_second)).await;
        }

        internal!(
            level = INFO,
            "Dispatch finished: {} success, {} failure, {} dry run, {} unknown",
            summary.count(DispatchStatus::Success),
            summary.count(DispatchStatus::Failure),
            summary.count(DispatchStatus::DryRun),
            summary.count(DispatchStatus::Unknown)
        );

        summary
    }

    /// Shared defaults plus one entry per recipient carrying its display
    /// name and the campaign placeholders.
    fn build_request(&self, batch: &[Contact]) -> BulkSendRequest {
        let with_name = |name: &str| {
            let mut data = self.config.template_data.clone();
            data.insert(self.config.name_placeholder.clone(), name.to_string());
            data
        };

        BulkSendRequest {
            sender: self.config.sender(),
            template_name: self.template_name.clone(),
            configuration_set: self.config.configuration_set.clone(),
            default_data: with_name(&self.config.placeholder_name),
            entries: batch
                .iter()
                .map(|contact| BulkEntry {
                    to: contact.email.trim().to_string(),
                    replacement_data: with_name(contact.display_name(&self.config.placeholder_name)),
                })
                .collect(),
        }
    }
}

/// Pair results with recipients by position; recipients past the end of
/// the result list are `UNKNOWN`.
fn reconcile(batch_number: usize, batch: &[Contact], results: Vec<EntryResult>) -> Vec<DispatchOutcome> {
    if results.len() != batch.len() {
        warn!(
            batch = batch_number,
            expected = batch.len(),
            received = results.len(),
            "Transport result count does not match batch size"
        );
    }

    let mut results = results.into_iter();
    batch
        .iter()
        .map(|contact| {
            results.next().map_or_else(
                || DispatchOutcome::new(contact, DispatchStatus::Unknown),
                |entry| DispatchOutcome::from_entry(contact, entry),
            )
        })
        .collect()
}
