//! Third-party reputation checks.
//!
//! Each address is submitted to an external verification service which
//! answers with a verdict. The checks run through a bounded worker pool
//! ([`pool::check_all`]); a request that fails is captured against its
//! contact and never cancels the others.

pub mod pool;

use std::fmt;

use async_trait::async_trait;
use mailrun_common::{Contact, outgoing, tracing::warn};
use serde::{Deserialize, Serialize};

use crate::error::ReputationError;

pub use pool::{ReputationOutcome, check_all};

/// Verdict returned by the reputation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReputationVerdict {
    #[serde(alias = "SAFE", alias = "safe")]
    Safe,
    #[serde(alias = "INVALID", alias = "invalid")]
    Invalid,
    #[serde(alias = "RISKY", alias = "risky")]
    Risky,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ReputationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "Safe",
            Self::Invalid => "Invalid",
            Self::Risky => "Risky",
            Self::Unknown => "Unknown",
        })
    }
}

/// Per-address answer from the reputation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationReport {
    #[serde(default)]
    pub email: String,
    #[serde(rename = "result")]
    pub verdict: ReputationVerdict,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub substatus_text: Option<String>,
    #[serde(default)]
    pub is_disposable: bool,
    #[serde(default)]
    pub is_role: bool,
    #[serde(default)]
    pub is_free: bool,
}

impl ReputationReport {
    /// Whether the verdict admits the address under the given policy.
    #[must_use]
    pub const fn is_acceptable(&self, accept_risky: bool) -> bool {
        match self.verdict {
            ReputationVerdict::Safe => true,
            ReputationVerdict::Risky => accept_risky,
            ReputationVerdict::Invalid | ReputationVerdict::Unknown => false,
        }
    }

    /// `verdict|status|substatus`, skipping empty parts.
    #[must_use]
    pub fn reason(&self) -> String {
        let verdict = self.verdict.to_string();
        [
            Some(verdict.as_str()),
            self.status_text.as_deref(),
            self.substatus_text.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|")
    }
}

/// External address verification service.
#[async_trait]
pub trait ReputationService: Send + Sync {
    /// Verify a single address.
    ///
    /// # Errors
    ///
    /// Returns a [`ReputationError`] if the service cannot be reached or
    /// answers with an error.
    async fn check(&self, email: &str) -> Result<ReputationReport, ReputationError>;

    /// Remaining credit balance on the account.
    ///
    /// # Errors
    ///
    /// Returns a [`ReputationError`] if the balance cannot be retrieved.
    async fn balance(&self) -> Result<f64, ReputationError>;
}

/// Configuration for the reputation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Endpoint that validates a single address (`POST {"email": ...}`).
    #[serde(default = "default_validate_url")]
    pub validate_url: String,

    /// Endpoint returning the current credit balance as a bare number.
    #[serde(default = "default_balance_url")]
    pub balance_url: String,

    /// Number of in-flight requests.
    ///
    /// Default: 5
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Treat `Risky` verdicts as acceptable.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_risky: bool,
}

fn default_validate_url() -> String {
    "https://app.nullbounce.com/api/v1/validation_history/validate/".to_string()
}

fn default_balance_url() -> String {
    "https://app.nullbounce.com/api/v1/balance_changes/current_balance/".to_string()
}

const fn default_concurrency() -> usize {
    5
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            validate_url: default_validate_url(),
            balance_url: default_balance_url(),
            concurrency: default_concurrency(),
            accept_risky: false,
        }
    }
}

/// HTTP client for a token-authenticated verification API.
#[derive(Debug, Clone)]
pub struct HttpReputationClient {
    client: reqwest::Client,
    validate_url: String,
    balance_url: String,
    api_key: String,
}

impl HttpReputationClient {
    #[must_use]
    pub fn new(client: reqwest::Client, config: &ReputationConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            validate_url: config.validate_url.clone(),
            balance_url: config.balance_url.clone(),
            api_key: api_key.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.api_key)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ReputationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ReputationError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ReputationService for HttpReputationClient {
    async fn check(&self, email: &str) -> Result<ReputationReport, ReputationError> {
        outgoing!("POST {} for {email}", self.validate_url);

        let response = self
            .client
            .post(&self.validate_url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;

        let body = error_for_status(response).await?.text().await?;
        let mut report: ReputationReport = serde_json::from_str(&body)
            .map_err(|e| ReputationError::Decode(format!("{e}: {body}")))?;

        if report.email.is_empty() {
            report.email = email.to_string();
        }

        Ok(report)
    }

    async fn balance(&self) -> Result<f64, ReputationError> {
        outgoing!("GET {}", self.balance_url);

        let response = self
            .client
            .get(&self.balance_url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;

        let text = error_for_status(response).await?.text().await?;
        Ok(parse_balance(&text))
    }
}

/// The balance endpoint answers with a bare number, possibly quoted.
/// Anything else counts as a zero balance.
fn parse_balance(text: &str) -> f64 {
    let raw = text.trim();
    raw.trim_matches('"').parse::<f64>().unwrap_or_else(|_| {
        warn!(balance = raw, "Balance reply is not a number, assuming 0");
        0.0
    })
}

/// One row of the full reputation report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationRow {
    pub contact: Contact,
    pub result: String,
    pub status_text: String,
    pub substatus_text: String,
    pub is_disposable: bool,
    pub is_role: bool,
    pub is_free: bool,
}

/// Contacts split by reputation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationPartition {
    pub admitted: Vec<Contact>,
    /// Contact and `verdict|status|substatus` reason.
    pub discarded: Vec<(Contact, String)>,
    /// Contact and captured request error; neither admitted nor discarded.
    pub failures: Vec<(Contact, String)>,
    /// Every contact, in input order.
    pub full: Vec<ReputationRow>,
}

/// Split contacts by their reputation outcome.
///
/// `contacts` and `outcomes` are aligned by position.
#[must_use]
pub fn partition(
    contacts: &[Contact],
    outcomes: Vec<ReputationOutcome>,
    accept_risky: bool,
) -> ReputationPartition {
    let mut partition = ReputationPartition::default();

    for (contact, outcome) in contacts.iter().zip(outcomes) {
        match outcome {
            ReputationOutcome::Checked(report) => {
                if report.is_acceptable(accept_risky) {
                    partition.admitted.push(contact.clone());
                } else {
                    partition.discarded.push((contact.clone(), report.reason()));
                }

                partition.full.push(ReputationRow {
                    contact: contact.clone(),
                    result: report.verdict.to_string(),
                    status_text: report.status_text.unwrap_or_default(),
                    substatus_text: report.substatus_text.unwrap_or_default(),
                    is_disposable: report.is_disposable,
                    is_role: report.is_role,
                    is_free: report.is_free,
                });
            }
            ReputationOutcome::Failed(error) => {
                partition.full.push(ReputationRow {
                    contact: contact.clone(),
                    result: "Error".to_string(),
                    status_text: "API Error".to_string(),
                    substatus_text: error.clone(),
                    is_disposable: false,
                    is_role: false,
                    is_free: false,
                });
                partition.failures.push((contact.clone(), error));
            }
        }
    }

    partition
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn report(verdict: ReputationVerdict, status: Option<&str>, sub: Option<&str>) -> ReputationReport {
        ReputationReport {
            email: String::new(),
            verdict,
            status_text: status.map(ToString::to_string),
            substatus_text: sub.map(ToString::to_string),
            is_disposable: false,
            is_role: false,
            is_free: false,
        }
    }

    #[test]
    fn test_deserialise_report() {
        let report: ReputationReport = serde_json::from_str(
            r#"{"email":"a@b.com","result":"Risky","status_text":"Catch-all","is_free":true}"#,
        )
        .unwrap();

        assert_eq!(report.verdict, ReputationVerdict::Risky);
        assert_eq!(report.status_text.as_deref(), Some("Catch-all"));
        assert!(report.is_free);
        assert!(!report.is_role);
    }

    #[test]
    fn test_unrecognised_verdict_is_unknown() {
        let report: ReputationReport =
            serde_json::from_str(r#"{"result":"Pending"}"#).unwrap();
        assert_eq!(report.verdict, ReputationVerdict::Unknown);
    }

    #[test]
    fn test_accept_risky_policy() {
        let risky = report(ReputationVerdict::Risky, None, None);
        assert!(!risky.is_acceptable(false));
        assert!(risky.is_acceptable(true));
        assert!(report(ReputationVerdict::Safe, None, None).is_acceptable(false));
        assert!(!report(ReputationVerdict::Unknown, None, None).is_acceptable(true));
    }

    #[test]
    fn test_reason_skips_empty_parts() {
        let r = report(ReputationVerdict::Invalid, Some("Mailbox not found"), Some(""));
        assert_eq!(r.reason(), "Invalid|Mailbox not found");
    }

    #[test]
    fn test_partition() {
        let contacts = vec![
            Contact::new("A", "a@x.com"),
            Contact::new("B", "b@x.com"),
            Contact::new("C", "c@x.com"),
        ];
        let outcomes = vec![
            ReputationOutcome::Checked(report(ReputationVerdict::Safe, None, None)),
            ReputationOutcome::Checked(report(ReputationVerdict::Invalid, Some("Bounce"), None)),
            ReputationOutcome::Failed("timeout".to_string()),
        ];

        let partition = partition(&contacts, outcomes, false);

        assert_eq!(partition.admitted, vec![contacts[0].clone()]);
        assert_eq!(
            partition.discarded,
            vec![(contacts[1].clone(), "Invalid|Bounce".to_string())]
        );
        assert_eq!(
            partition.failures,
            vec![(contacts[2].clone(), "timeout".to_string())]
        );
        assert_eq!(partition.full.len(), 3);
        assert_eq!(partition.full[2].result, "Error");
        assert_eq!(partition.full[2].substatus_text, "timeout");
    }

    #[test]
    fn test_parse_balance() {
        assert!((parse_balance(" 1250\n") - 1250.0).abs() < f64::EPSILON);
        assert!((parse_balance("\"42.5\"") - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_numeric_balance_is_zero() {
        assert!(parse_balance("unlimited").abs() < f64::EPSILON);
        assert!(parse_balance("").abs() < f64::EPSILON);
    }
}
