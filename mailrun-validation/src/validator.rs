//! Ordered contact list validation.
//!
//! Each contact goes through syntax, domain presence, deliverability,
//! suppression (when enabled) and de-duplication, stopping at the first
//! failing stage. Every input contact ends up in exactly one of the two
//! outputs, and admitted contacts keep their relative order.

use std::{fmt, sync::Arc};

use ahash::AHashSet;
use mailrun_common::{Contact, internal, tracing::debug};
use serde::{Deserialize, Serialize};

use crate::{
    dns::{MailResolver, ProbeConfig, normalize_domain},
    error::ValidationError,
    prober::DeliverabilityProber,
    suppression::{SuppressionFilter, SuppressionSnapshot, SuppressionSource},
};

/// How often progress is logged, in contacts.
const PROGRESS_INTERVAL: usize = 1000;

/// Why a contact was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    InvalidSyntax,
    MissingDomain,
    DomainUnreachable,
    Suppressed,
    Duplicate,
}

impl RejectionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSyntax => "INVALID_SYNTAX",
            Self::MissingDomain => "MISSING_DOMAIN",
            Self::DomainUnreachable => "DOMAIN_UNREACHABLE",
            Self::Suppressed => "SUPPRESSED",
            Self::Duplicate => "DUPLICATE",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected contact and the stage that rejected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub contact: Contact,
    pub reason: RejectionReason,
    /// Diagnostic from the failing stage, e.g. the DNS error.
    pub detail: Option<String>,
}

/// Partition of a contact list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub admitted: Vec<Contact>,
    pub rejected: Vec<RejectionRecord>,
    /// Distinct domains probed during the run.
    pub domains_probed: usize,
    /// Of those, how many were found unreachable.
    pub domains_unreachable: usize,
}

impl ValidationOutcome {
    #[must_use]
    pub fn total(&self) -> usize {
        self.admitted.len() + self.rejected.len()
    }

    /// Number of rejections with the given reason.
    #[must_use]
    pub fn rejected_for(&self, reason: RejectionReason) -> usize {
        self.rejected.iter().filter(|r| r.reason == reason).count()
    }
}

/// Which stages a validation run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Syntax, deliverability, suppression and duplicates.
    #[default]
    Full,
    /// Everything except the suppression check.
    DnsOnly,
}

impl std::str::FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "dns-only" | "dns_only" | "dnsonly" => Ok(Self::DnsOnly),
            other => Err(format!("unknown validation mode '{other}', expected full or dns-only")),
        }
    }
}

type Rejection = (RejectionReason, Option<String>);

/// Single-pass validator over one contact list.
///
/// Owns the prober (and its domain cache), the optional suppression
/// snapshot and the running set of admitted identities, so nothing leaks
/// between runs.
pub struct ListValidator {
    prober: DeliverabilityProber,
    suppression: Option<SuppressionSnapshot>,
    seen: AHashSet<String>,
}

impl ListValidator {
    /// `suppression` enables the suppression stage when present.
    #[must_use]
    pub fn new(prober: DeliverabilityProber, suppression: Option<SuppressionSnapshot>) -> Self {
        Self {
            prober,
            suppression,
            seen: AHashSet::new(),
        }
    }

    /// Validate contacts in order.
    pub async fn validate(&mut self, contacts: Vec<Contact>) -> ValidationOutcome {
        let total = contacts.len();
        let mut outcome = ValidationOutcome::default();

        internal!(level = INFO, "Validating {total} contact(s)");

        for (index, contact) in contacts.into_iter().enumerate() {
            match self.check(&contact).await {
                Ok(identity) => {
                    self.seen.insert(identity);
                    outcome.admitted.push(contact);
                }
                Err((reason, detail)) => {
                    debug!(email = %contact.email, %reason, "Contact rejected");
                    outcome.rejected.push(RejectionRecord {
                        contact,
                        reason,
                        detail,
                    });
                }
            }

            let processed = index + 1;
            if processed % PROGRESS_INTERVAL == 0 || processed == total {
                internal!(level = INFO, "Processed {processed}/{total} contact(s)");
            }
        }

        outcome.domains_probed = self.prober.cache().len();
        outcome.domains_unreachable = self.prober.cache().unreachable_count();

        internal!(
            level = INFO,
            "Validation finished: {} admitted, {} rejected, {} domain(s) probed, {} unreachable",
            outcome.admitted.len(),
            outcome.rejected.len(),
            outcome.domains_probed,
            outcome.domains_unreachable
        );

        outcome
    }

    /// Returns the contact's identity when it passes every active stage.
    async fn check(&mut self, contact: &Contact) -> Result<String, Rejection> {
        let parts = contact
            .parts()
            .map_err(|e| (RejectionReason::InvalidSyntax, Some(e.to_string())))?;

        if normalize_domain(parts.domain).is_empty() {
            return Err((
                RejectionReason::MissingDomain,
                Some(format!("no usable domain in {}", contact.email.trim())),
            ));
        }

        let verdict = self.prober.probe(parts.domain).await;
        if !verdict.reachable {
            return Err((RejectionReason::DomainUnreachable, verdict.error));
        }

        let identity = contact.identity();

        if let Some(suppression) = &self.suppression
            && suppression.contains(&identity)
        {
            return Err((RejectionReason::Suppressed, None));
        }

        if self.seen.contains(&identity) {
            return Err((RejectionReason::Duplicate, None));
        }

        Ok(identity)
    }
}

/// Everything needed to run one validation pass: the resolver, probing
/// policy and, for full validation, the suppression source.
///
/// Each call to [`ValidationRun::execute`] builds a fresh domain cache,
/// suppression snapshot and duplicate set.
pub struct ValidationRun {
    resolver: Arc<dyn MailResolver>,
    probe: ProbeConfig,
    mode: ValidationMode,
    suppression: Option<Arc<dyn SuppressionSource>>,
}

impl ValidationRun {
    #[must_use]
    pub fn new(resolver: Arc<dyn MailResolver>, probe: ProbeConfig, mode: ValidationMode) -> Self {
        Self {
            resolver,
            probe,
            mode,
            suppression: None,
        }
    }

    #[must_use]
    pub fn with_suppression_source(mut self, source: Arc<dyn SuppressionSource>) -> Self {
        self.suppression = Some(source);
        self
    }

    /// Load run-scoped state and validate `contacts`.
    ///
    /// # Errors
    ///
    /// Setup failures only: a missing or failing suppression source in
    /// [`ValidationMode::Full`]. Per-contact problems become rejections.
    pub async fn execute(&self, contacts: Vec<Contact>) -> Result<ValidationOutcome, ValidationError> {
        let snapshot = match self.mode {
            ValidationMode::Full => {
                let source = self
                    .suppression
                    .clone()
                    .ok_or(ValidationError::MissingSuppressionSource)?;
                Some(SuppressionFilter::new(source).load().await?)
            }
            ValidationMode::DnsOnly => None,
        };

        let prober = DeliverabilityProber::new(Arc::clone(&self.resolver), self.probe.clone());
        let mut validator = ListValidator::new(prober, snapshot);
        Ok(validator.validate(contacts).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ahash::AHashMap;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dns::{DnsError, RecordKind};

    struct MapResolver(AHashMap<String, usize>);

    #[async_trait]
    impl MailResolver for MapResolver {
        async fn lookup(&self, kind: RecordKind, domain: &str) -> Result<usize, DnsError> {
            match (kind, self.0.get(domain)) {
                (RecordKind::Mx, Some(count)) => Ok(*count),
                _ => Err(DnsError::DomainNotFound(domain.to_string())),
            }
        }
    }

    fn validator(suppression: Option<SuppressionSnapshot>) -> ListValidator {
        let resolver = MapResolver(
            [("good.com".to_string(), 1), ("y.com".to_string(), 1)]
                .into_iter()
                .collect(),
        );
        let prober = DeliverabilityProber::new(
            Arc::new(resolver),
            ProbeConfig {
                retries: 0,
                ..ProbeConfig::default()
            },
        );
        ListValidator::new(prober, suppression)
    }

    #[tokio::test]
    async fn test_stage_order_short_circuits() {
        let mut validator = validator(Some(["dup@good.com"].into_iter().collect()));

        // Suppressed and duplicate at once: suppression wins
        let outcome = validator
            .validate(vec![Contact::new("S", "dup@good.com")])
            .await;

        assert_eq!(outcome.rejected[0].reason, RejectionReason::Suppressed);
    }

    #[tokio::test]
    async fn test_domain_counts() {
        let mut validator = validator(None);
        let outcome = validator
            .validate(vec![
                Contact::new("A", "a@good.com"),
                Contact::new("B", "b@GOOD.com"),
                Contact::new("C", "c@gone.com"),
                Contact::new("D", "d@gone.com"),
                Contact::new("E", "not-an-address"),
            ])
            .await;

        assert_eq!(outcome.domains_probed, 2);
        assert_eq!(outcome.domains_unreachable, 1);
        assert_eq!(outcome.rejected_for(RejectionReason::DomainUnreachable), 2);
    }

    #[tokio::test]
    async fn test_syntax_and_missing_domain() {
        let mut validator = validator(None);
        let outcome = validator
            .validate(vec![
                Contact::new("A", "not-an-address"),
                Contact::new("B", "b@."),
                Contact::new("C", "c@<>.com"),
            ])
            .await;

        let reasons: Vec<_> = outcome.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectionReason::InvalidSyntax,
                RejectionReason::MissingDomain,
                RejectionReason::DomainUnreachable,
            ]
        );
        assert!(outcome.admitted.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_ignore_case_and_name() {
        let mut validator = validator(None);
        let outcome = validator
            .validate(vec![
                Contact::new("First", "Same@Good.com"),
                Contact::new("Second", "same@good.com "),
            ])
            .await;

        assert_eq!(outcome.admitted, vec![Contact::new("First", "Same@Good.com")]);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::Duplicate);
        assert_eq!(outcome.rejected[0].contact.name, "Second");
    }

    #[tokio::test]
    async fn test_rejected_duplicate_of_rejected_contact_is_not_duplicate() {
        let mut validator = validator(Some(["x@y.com"].into_iter().collect()));
        let outcome = validator
            .validate(vec![Contact::new("", "x@y.com"), Contact::new("", "x@y.com")])
            .await;

        assert_eq!(outcome.rejected_for(RejectionReason::Suppressed), 2);
        assert_eq!(outcome.rejected_for(RejectionReason::Duplicate), 0);
    }

    #[test]
    fn test_validation_mode_from_str() {
        assert_eq!("dns-only".parse::<ValidationMode>(), Ok(ValidationMode::DnsOnly));
        assert_eq!("FULL".parse::<ValidationMode>(), Ok(ValidationMode::Full));
        assert!("partial".parse::<ValidationMode>().is_err());
    }

    #[test]
    fn test_reason_serialises_screaming_case() {
        let json = serde_json::to_string(&RejectionReason::DomainUnreachable).unwrap();
        assert_eq!(json, "\"DOMAIN_UNREACHABLE\"");
    }
}
