//! Per-run cache of domain deliverability verdicts.
//!
//! Entries are never refreshed or evicted: a verdict computed during a run,
//! negative ones included, is final for that run. The cache is owned by a
//! single prober and is mutated from one task only.

use ahash::AHashMap;
use mailrun_common::Domain;
use serde::{Deserialize, Serialize};

/// How a domain was found to accept mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeMethod {
    /// At least one MX record.
    Mx,
    /// No usable MX, but A or AAAA records exist.
    FallbackAddress,
    /// Not reachable.
    None,
}

/// The outcome of probing one normalised domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerdict {
    pub domain: Domain,
    pub reachable: bool,
    pub method: ProbeMethod,
    /// Last error observed before giving up, for diagnostics.
    pub error: Option<String>,
}

impl DomainVerdict {
    #[must_use]
    pub const fn reachable(domain: Domain, method: ProbeMethod) -> Self {
        Self {
            domain,
            reachable: true,
            method,
            error: None,
        }
    }

    #[must_use]
    pub fn unreachable(domain: Domain, error: impl Into<String>) -> Self {
        Self {
            domain,
            reachable: false,
            method: ProbeMethod::None,
            error: Some(error.into()),
        }
    }
}

/// Mapping from normalised domain to its verdict.
#[derive(Debug, Default)]
pub struct DomainCache {
    entries: AHashMap<Domain, DomainVerdict>,
}

impl DomainCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, domain: &Domain) -> Option<&DomainVerdict> {
        self.entries.get(domain)
    }

    /// Store a verdict unless one already exists for its domain.
    ///
    /// Returns `true` if the verdict was stored.
    pub fn insert(&mut self, verdict: DomainVerdict) -> bool {
        if self.entries.contains_key(&verdict.domain) {
            return false;
        }

        self.entries.insert(verdict.domain.clone(), verdict);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached verdicts that are unreachable.
    #[must_use]
    pub fn unreachable_count(&self) -> usize {
        self.entries.values().filter(|v| !v.reachable).count()
    }
}
