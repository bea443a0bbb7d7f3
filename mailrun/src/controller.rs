//! Command runners.
//!
//! Each command reads its input, drives one stage with collaborators built
//! from the configuration, and writes its output files. Setup problems
//! (unreadable input, missing credentials, an unreachable suppression or
//! balance endpoint) abort the command; per-contact problems end up in the
//! output files instead.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, bail};
use async_trait::async_trait;
use mailrun_common::{Contact, contact::is_valid_shape, internal};
use mailrun_dispatch::{
    BatchDispatcher, BulkSendRequest, DispatchStatus, DispatchSummary, EmailTemplate, EntryResult,
    HttpTransport, ReportWriter, TemplateCreation, Transport, TransportError,
};
use mailrun_validation::{
    FileSuppressionSource, HickoryMailResolver, HttpSuppressionSource, MailResolver,
    RejectionReason, SuppressionSource, ValidationMode, ValidationRun,
    reputation::{self, HttpReputationClient, ReputationService},
};
use tracing::warn;

use crate::{
    config::Mailrun,
    contacts::{
        self, CleanOptions, ContactTable, base_name, clean_table, sample_canary, write_split,
    },
};

/// Counts and output files of `mailrun validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateReport {
    pub processed: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub unreachable: usize,
    pub suppressed: usize,
    pub duplicates: usize,
    pub domains_probed: usize,
    pub domains_unreachable: usize,
    pub admitted_path: PathBuf,
    pub rejected_path: PathBuf,
}

impl fmt::Display for ValidateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processed:   {}", self.processed)?;
        writeln!(f, "Admitted:    {}", self.admitted)?;
        writeln!(
            f,
            "Rejected:    {} ({} unreachable domain, {} suppressed, {} duplicate)",
            self.rejected, self.unreachable, self.suppressed, self.duplicates
        )?;
        writeln!(
            f,
            "Domains:     {} probed, {} unreachable",
            self.domains_probed, self.domains_unreachable
        )?;
        writeln!(f, "Admitted list: {}", self.admitted_path.display())?;
        write!(f, "Rejected list: {}", self.rejected_path.display())
    }
}

/// Counts and output files of `mailrun reputation`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationRunReport {
    pub balance: f64,
    pub checked: usize,
    pub admitted: usize,
    pub discarded: usize,
    pub failures: usize,
    pub admitted_path: PathBuf,
    pub discarded_path: PathBuf,
    pub failures_path: PathBuf,
    pub full_path: PathBuf,
}

impl fmt::Display for ReputationRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Balance before run: {}", self.balance)?;
        writeln!(f, "Checked:   {}", self.checked)?;
        writeln!(f, "Admitted:  {} -> {}", self.admitted, self.admitted_path.display())?;
        writeln!(f, "Discarded: {} -> {}", self.discarded, self.discarded_path.display())?;
        writeln!(f, "Failures:  {} -> {}", self.failures, self.failures_path.display())?;
        write!(f, "Full report: {}", self.full_path.display())
    }
}

/// Counts and report file of `mailrun send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Rows dropped before sending for a malformed address.
    pub skipped: usize,
    pub summary: DispatchSummary,
    pub report_path: PathBuf,
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped > 0 {
            writeln!(f, "Skipped (malformed): {}", self.skipped)?;
        }
        writeln!(f, "Success: {}", self.summary.count(DispatchStatus::Success))?;
        writeln!(f, "Failure: {}", self.summary.count(DispatchStatus::Failure))?;
        writeln!(f, "Dry run: {}", self.summary.count(DispatchStatus::DryRun))?;
        writeln!(f, "Unknown: {}", self.summary.count(DispatchStatus::Unknown))?;
        write!(f, "Report:  {}", self.report_path.display())
    }
}

/// Counts and output file of `mailrun clean`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub read: usize,
    pub kept: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub path: PathBuf,
}

impl fmt::Display for CleanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Read:       {}", self.read)?;
        writeln!(f, "Kept:       {}", self.kept)?;
        writeln!(f, "Dropped:    {}", self.dropped)?;
        writeln!(f, "Duplicates: {}", self.duplicates)?;
        write!(f, "Output:     {}", self.path.display())
    }
}

/// Counts and output files of `mailrun canary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryReport {
    pub domains: usize,
    pub canary: usize,
    pub remaining: usize,
    pub canary_path: PathBuf,
    pub remaining_path: PathBuf,
}

impl fmt::Display for CanaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Domains:   {}", self.domains)?;
        writeln!(f, "Canary:    {} -> {}", self.canary, self.canary_path.display())?;
        write!(f, "Remaining: {} -> {}", self.remaining, self.remaining_path.display())
    }
}

/// Stands in for the transport when no endpoint is configured; only
/// reachable in dry runs, which never call it.
struct UnconfiguredTransport;

#[async_trait]
impl Transport for UnconfiguredTransport {
    async fn send_bulk(&self, _request: &BulkSendRequest) -> Result<Vec<EntryResult>, TransportError> {
        Err(TransportError::Rejected("no transport endpoint configured".to_string()))
    }

    async fn create_template(
        &self,
        _template: &EmailTemplate,
    ) -> Result<TemplateCreation, TransportError> {
        Err(TransportError::Rejected("no transport endpoint configured".to_string()))
    }
}

/// Runs file work on the blocking pool.
async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("File task did not complete")?
}

/// Runs the `mailrun` commands against one resolved configuration.
pub struct Controller {
    config: Mailrun,
    client: reqwest::Client,
}

impl Controller {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: Mailrun) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.transport.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    #[must_use]
    pub const fn config(&self) -> &Mailrun {
        &self.config
    }

    fn read_contacts(&self, input: &Path) -> anyhow::Result<Vec<Contact>> {
        let contacts = contacts::read_contacts(input, self.config.placeholder_name())?;
        internal!(
            level = INFO,
            "Read {} contact(s) from {}",
            contacts.len(),
            input.display()
        );
        Ok(contacts)
    }

    async fn load_contacts(&self, input: &Path) -> anyhow::Result<Vec<Contact>> {
        let path = input.to_path_buf();
        let placeholder = self.config.placeholder_name().to_string();
        let contacts = blocking(move || Ok(contacts::read_contacts(&path, &placeholder)?)).await?;
        internal!(
            level = INFO,
            "Read {} contact(s) from {}",
            contacts.len(),
            input.display()
        );
        Ok(contacts)
    }

    fn suppression_source(&self) -> Option<Arc<dyn SuppressionSource>> {
        let suppression = &self.config.validation.suppression;

        if let Some(url) = &suppression.url {
            return Some(Arc::new(
                HttpSuppressionSource::new(
                    self.client.clone(),
                    url.clone(),
                    self.config.secrets.suppression_api_key.clone(),
                )
                .with_page_size(suppression.page_size),
            ));
        }

        suppression
            .file
            .as_ref()
            .map(|file| Arc::new(FileSuppressionSource::new(file.clone())) as Arc<dyn SuppressionSource>)
    }

    fn transport(&self) -> anyhow::Result<Arc<dyn Transport>> {
        match &self.config.transport.endpoint {
            Some(endpoint) => Ok(Arc::new(HttpTransport::new(
                self.client.clone(),
                endpoint,
                self.config.secrets.transport_api_key.clone(),
            ))),
            None if self.config.dispatch.dry_run => Ok(Arc::new(UnconfiguredTransport)),
            None => bail!("No transport endpoint configured (transport.endpoint)"),
        }
    }

    /// `mailrun validate`: deliverability, suppression and duplicate checks.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input, a resolver that cannot be built, a
    /// suppression list that cannot be loaded in full mode, or unwritable
    /// output files.
    pub async fn validate(
        &self,
        input: &Path,
        mode: ValidationMode,
        output_dir: &Path,
    ) -> anyhow::Result<ValidateReport> {
        let resolver = HickoryMailResolver::new(&self.config.probe)
            .context("Failed to configure DNS resolver")?;

        let suppression = match mode {
            ValidationMode::Full => self.suppression_source(),
            ValidationMode::DnsOnly => None,
        };

        self.validate_with(input, mode, output_dir, Arc::new(resolver), suppression)
            .await
    }

    /// [`Controller::validate`] with explicit collaborators.
    ///
    /// # Errors
    ///
    /// See [`Controller::validate`].
    pub async fn validate_with(
        &self,
        input: &Path,
        mode: ValidationMode,
        output_dir: &Path,
        resolver: Arc<dyn MailResolver>,
        suppression: Option<Arc<dyn SuppressionSource>>,
    ) -> anyhow::Result<ValidateReport> {
        let contacts = self.load_contacts(input).await?;
        let processed = contacts.len();

        let mut run = ValidationRun::new(resolver, self.config.probe.clone(), mode);
        if let Some(source) = suppression {
            run = run.with_suppression_source(source);
        }

        internal!(
            level = INFO,
            "Validating with {} policy in {mode:?} mode",
            self.config.probe.policy
        );

        let outcome = run.execute(contacts).await?;

        let base = base_name(input);
        let admitted_path = output_dir.join(format!("{base}_admitted.csv"));
        let rejected_path = output_dir.join(format!("{base}_rejected.csv"));

        let report = ValidateReport {
            processed,
            admitted: outcome.admitted.len(),
            rejected: outcome.rejected.len(),
            unreachable: outcome.rejected_for(RejectionReason::DomainUnreachable),
            suppressed: outcome.rejected_for(RejectionReason::Suppressed),
            duplicates: outcome.rejected_for(RejectionReason::Duplicate),
            domains_probed: outcome.domains_probed,
            domains_unreachable: outcome.domains_unreachable,
            admitted_path: admitted_path.clone(),
            rejected_path: rejected_path.clone(),
        };

        blocking(move || {
            contacts::write_contacts(&admitted_path, &outcome.admitted)?;
            contacts::write_rejections(&rejected_path, &outcome.rejected)?;
            Ok(())
        })
        .await?;

        Ok(report)
    }

    /// `mailrun reputation`: third-party verdicts for every contact.
    ///
    /// # Errors
    ///
    /// Fails without an API key, when the balance cannot be fetched, or on
    /// unreadable input or unwritable output.
    pub async fn reputation(&self, input: &Path) -> anyhow::Result<ReputationRunReport> {
        let api_key = self
            .config
            .secrets
            .reputation_api_key
            .clone()
            .context("MAILRUN_REPUTATION_API_KEY is not set")?;

        let service = HttpReputationClient::new(self.client.clone(), &self.config.reputation, api_key);
        self.reputation_with(input, Arc::new(service)).await
    }

    /// [`Controller::reputation`] with an explicit service.
    ///
    /// # Errors
    ///
    /// See [`Controller::reputation`].
    pub async fn reputation_with(
        &self,
        input: &Path,
        service: Arc<dyn ReputationService>,
    ) -> anyhow::Result<ReputationRunReport> {
        let balance = service
            .balance()
            .await
            .context("Failed to fetch reputation credit balance")?;

        let contacts = self.load_contacts(input).await?;
        internal!(level = INFO, "Reputation balance: {balance}");

        #[allow(clippy::cast_precision_loss)]
        let needed = contacts.len() as f64;
        if balance < needed {
            warn!(
                balance,
                contacts = contacts.len(),
                "Balance may not cover every check"
            );
        }

        let settings = &self.config.reputation;
        let outcomes = reputation::check_all(service, &contacts, settings.concurrency).await;
        let partition = reputation::partition(&contacts, outcomes, settings.accept_risky);

        let base = base_name(input);
        let directory = &self.config.lists.filtered_dir;
        let admitted_path = directory.join(format!("{base}_valid.csv"));
        let discarded_path = directory.join(format!("{base}_discarded.csv"));
        let failures_path = directory.join(format!("{base}_failures.csv"));
        let full_path = directory.join(format!("{base}_full.csv"));

        let report = ReputationRunReport {
            balance,
            checked: contacts.len(),
            admitted: partition.admitted.len(),
            discarded: partition.discarded.len(),
            failures: partition.failures.len(),
            admitted_path: admitted_path.clone(),
            discarded_path: discarded_path.clone(),
            failures_path: failures_path.clone(),
            full_path: full_path.clone(),
        };

        blocking(move || {
            contacts::write_contacts(&admitted_path, &partition.admitted)?;
            contacts::write_annotated(&discarded_path, "reason", &partition.discarded)?;
            contacts::write_annotated(&failures_path, "error", &partition.failures)?;
            contacts::write_reputation_report(&full_path, &partition.full)?;
            Ok(())
        })
        .await?;

        Ok(report)
    }

    /// `mailrun send`: dispatch a list and write the send report.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input, a list with no sendable contacts, a
    /// missing transport endpoint outside dry runs, or an unwritable report.
    pub async fn send(&self, input: &Path) -> anyhow::Result<SendReport> {
        let transport = self.transport()?;
        self.send_with(input, transport).await
    }

    /// [`Controller::send`] with an explicit transport.
    ///
    /// # Errors
    ///
    /// See [`Controller::send`].
    pub async fn send_with(
        &self,
        input: &Path,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<SendReport> {
        let contacts = self.load_contacts(input).await?;
        let read = contacts.len();

        let contacts: Vec<Contact> = contacts
            .into_iter()
            .filter(|c| is_valid_shape(&c.email))
            .collect();
        let skipped = read - contacts.len();

        if skipped > 0 {
            warn!(skipped, "Skipping contact(s) with a malformed address");
        }

        if contacts.is_empty() {
            bail!("No sendable contacts in {}", input.display());
        }

        let dispatcher = BatchDispatcher::new(
            transport,
            self.config.dispatch.clone(),
            self.config.template.name.clone(),
        );
        let summary = dispatcher.dispatch(&contacts).await;

        let report_path = ReportWriter::new(&self.config.report_dir)
            .write(&summary.outcomes)
            .await
            .context("Failed to write send report")?;

        internal!(level = INFO, "Send report written to {}", report_path.display());

        Ok(SendReport {
            skipped,
            summary,
            report_path,
        })
    }

    /// `mailrun template`: register the campaign template.
    ///
    /// # Errors
    ///
    /// Fails when the template files cannot be read, no endpoint is
    /// configured, or the transport refuses for a reason other than the
    /// template already existing.
    pub async fn create_template(&self) -> anyhow::Result<TemplateCreation> {
        if self.config.transport.endpoint.is_none() {
            bail!("No transport endpoint configured (transport.endpoint)");
        }

        let transport = self.transport()?;
        self.create_template_with(transport).await
    }

    /// [`Controller::create_template`] with an explicit transport.
    ///
    /// # Errors
    ///
    /// See [`Controller::create_template`].
    pub async fn create_template_with(
        &self,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<TemplateCreation> {
        let settings = &self.config.template;
        let template = EmailTemplate::load(settings)
            .await
            .with_context(|| format!("Failed to read template files for '{}'", settings.name))?;

        let placeholders = template.placeholders();
        internal!(
            level = INFO,
            "Template '{}' uses placeholders: {placeholders:?}",
            template.name
        );

        let creation = transport
            .create_template(&template)
            .await
            .with_context(|| format!("Failed to create template '{}'", template.name))?;

        match creation {
            TemplateCreation::Created => {
                internal!(level = INFO, "Template '{}' created", template.name);
            }
            TemplateCreation::AlreadyExists => {
                internal!(level = INFO, "Template '{}' already exists", template.name);
            }
        }

        Ok(creation)
    }

    /// `mailrun clean`: normalise names and addresses and drop repeats.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input or unwritable output.
    pub fn clean(&self, input: &Path, remove_hyphens: bool) -> anyhow::Result<CleanReport> {
        let table = ContactTable::load(input)?;
        let summary = clean_table(&table, CleanOptions { remove_hyphens });

        let path = self
            .config
            .lists
            .cleaned_dir
            .join(format!("{}_clean.csv", base_name(input)));
        contacts::write_contacts(&path, &summary.contacts)?;

        Ok(CleanReport {
            read: summary.read,
            kept: summary.contacts.len(),
            dropped: summary.dropped,
            duplicates: summary.duplicates,
            path,
        })
    }

    /// `mailrun split`: cut a list into files of at most `max_per_file` rows.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input or unwritable output.
    pub fn split(&self, input: &Path, max_per_file: usize) -> anyhow::Result<Vec<(PathBuf, usize)>> {
        if max_per_file == 0 {
            bail!("max per file must be at least 1");
        }

        let table = ContactTable::load(input)?;
        let directory = self.config.lists.filtered_dir.join(base_name(input));
        let written = write_split(&directory, &table, max_per_file)?;

        internal!(
            level = INFO,
            "Split {} row(s) into {} file(s) under {}",
            table.rows.len(),
            written.len(),
            directory.display()
        );

        Ok(written)
    }

    /// `mailrun canary`: sample up to `per_domain` contacts from each domain.
    ///
    /// # Errors
    ///
    /// Fails on unreadable input or unwritable output.
    pub fn canary(&self, input: &Path, per_domain: usize) -> anyhow::Result<CanaryReport> {
        let contacts = self.read_contacts(input)?;
        let split = sample_canary(&contacts, per_domain, &mut rand::rng());

        let directory = &self.config.lists.filtered_dir;
        let canary_path = directory.join("canary.csv");
        let remaining_path = directory.join("remaining.csv");

        contacts::write_contacts(&canary_path, &split.canary)?;
        contacts::write_contacts(&remaining_path, &split.remaining)?;

        Ok(CanaryReport {
            domains: split.domains,
            canary: split.canary.len(),
            remaining: split.remaining.len(),
            canary_path,
            remaining_path,
        })
    }
}
