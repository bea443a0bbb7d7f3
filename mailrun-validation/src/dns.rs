//! DNS lookups for deliverability probing.
//!
//! The prober only needs to know whether a record set is non-empty, so the
//! [`MailResolver`] seam returns record counts. [`HickoryMailResolver`] is the
//! production implementation; tests substitute in-memory resolvers.
//!
//! Retries and timeouts are owned by the prober, so the hickory resolver is
//! configured for a single attempt per query.

use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver,
    config::{NameServerConfig, NameServerConfigGroup, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::{rr::Name, xfer::Protocol},
};
use mailrun_common::{Domain, outgoing};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    /// The query succeeded but returned no records of the requested kind.
    #[error("No {kind} records found for domain: {domain}")]
    NoRecords { domain: String, kind: RecordKind },

    /// Domain does not exist (NXDOMAIN).
    #[error("Domain does not exist: {0}")]
    DomainNotFound(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(String),

    /// DNS query exceeded its deadline.
    #[error("DNS {kind} query timed out after {after_ms}ms for domain: {domain}")]
    Timeout {
        domain: String,
        kind: RecordKind,
        after_ms: u64,
    },

    /// The resolver could not be constructed.
    #[error("DNS resolver initialisation failed: {0}")]
    Init(String),
}

impl DnsError {
    /// Returns `true` if this error came from a deadline rather than an answer.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// DNS record types consulted by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Mx,
    A,
    Aaaa,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mx => "MX",
            Self::A => "A",
            Self::Aaaa => "AAAA",
        })
    }
}

/// How hard the prober tries before declaring a domain unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainPolicy {
    /// Only MX records count; failed MX queries are retried.
    #[default]
    Strict,
    /// A failed MX query is followed by A then AAAA lookups.
    Lenient,
}

impl FromStr for DomainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown domain policy '{other}', expected strict or lenient")),
        }
    }
}

impl fmt::Display for DomainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        })
    }
}

/// Configuration for deliverability probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Strict (MX only) or lenient (MX, then A/AAAA) policy.
    ///
    /// Default: strict
    #[serde(default)]
    pub policy: DomainPolicy,

    /// Deadline for each individual DNS query, in milliseconds.
    ///
    /// Default: 4000
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts after the first failed one.
    ///
    /// Default: 2
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Nameservers to query instead of the system configuration.
    #[serde(default)]
    pub nameservers: Vec<SocketAddr>,
}

const fn default_timeout_ms() -> u64 {
    4000
}

const fn default_retries() -> u32 {
    2
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            policy: DomainPolicy::default(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            nameservers: Vec::new(),
        }
    }
}

impl ProbeConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total number of attempts, the first one included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Minimal DNS capability needed by the prober.
#[async_trait]
pub trait MailResolver: Send + Sync {
    /// Number of records of `kind` published for `domain`.
    ///
    /// An empty answer is `Ok(0)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`DnsError`] when the query itself fails.
    async fn lookup(&self, kind: RecordKind, domain: &str) -> Result<usize, DnsError>;
}

/// [`MailResolver`] backed by `hickory-resolver`.
#[derive(Debug)]
pub struct HickoryMailResolver {
    resolver: TokioResolver,
}

impl HickoryMailResolver {
    /// Creates a resolver from the system configuration, or from the
    /// configured nameservers when any are given.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &ProbeConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.timeout();
        opts.attempts = 1;

        let resolver = if config.nameservers.is_empty() {
            TokioResolver::builder(TokioConnectionProvider::default())
                .map_err(|e| DnsError::Init(e.to_string()))?
                .with_options(opts)
                .build()
        } else {
            let mut group = NameServerConfigGroup::new();
            for addr in &config.nameservers {
                group.push(NameServerConfig::new(*addr, Protocol::Udp));
                group.push(NameServerConfig::new(*addr, Protocol::Tcp));
            }

            TokioResolver::builder_with_config(
                ResolverConfig::from_parts(None, vec![], group),
                TokioConnectionProvider::default(),
            )
            .with_options(opts)
            .build()
        };

        Ok(Self { resolver })
    }
}

#[async_trait]
impl MailResolver for HickoryMailResolver {
    async fn lookup(&self, kind: RecordKind, domain: &str) -> Result<usize, DnsError> {
        outgoing!("{kind} lookup for {domain}");

        let result = match kind {
            RecordKind::Mx => self.resolver.mx_lookup(domain).await.map(|l| l.iter().count()),
            RecordKind::A => self
                .resolver
                .ipv4_lookup(domain)
                .await
                .map(|l| l.iter().count()),
            RecordKind::Aaaa => self
                .resolver
                .ipv6_lookup(domain)
                .await
                .map(|l| l.iter().count()),
        };

        match result {
            Ok(count) => Ok(count),
            Err(err) if err.is_nx_domain() => Err(DnsError::DomainNotFound(domain.to_string())),
            Err(err) if err.is_no_records_found() => Ok(0),
            Err(err) => Err(DnsError::LookupFailed(err.to_string())),
        }
    }
}

/// Punctuation carried over from malformed addresses (`<user@host>`, quoted
/// cells, trailing separators).
const STRAY: &[char] = &['<', '>', '"', '\'', '(', ')', '[', ']', '{', '}', ',', ';', ':', '.'];

/// Normalise a raw domain: strip stray punctuation and whitespace,
/// lower-case, and fold internationalised labels to their ASCII form.
///
/// A domain that cannot be IDNA-encoded is kept lower-cased so that the
/// lookup fails and is reported against the original spelling.
#[must_use]
pub fn normalize_domain(raw: &str) -> Domain {
    let lowered = raw
        .trim_matches(|c: char| c.is_whitespace() || STRAY.contains(&c))
        .to_lowercase();

    if lowered.is_ascii() {
        return Domain::from(lowered);
    }

    match Name::from_utf8(&lowered) {
        Ok(name) => Domain::from(name.to_ascii().trim_end_matches('.').to_string()),
        Err(_) => Domain::from(lowered),
    }
}
