//! Provider-side suppression list.
//!
//! The list is read once at the start of a validation run by following
//! continuation tokens until the source stops returning one. The resulting
//! [`SuppressionSnapshot`] is immutable for the rest of the run.

use std::{path::PathBuf, sync::Arc};

use ahash::AHashSet;
use async_trait::async_trait;
use mailrun_common::{contact::normalize_email, internal, outgoing, tracing::debug};
use serde::{Deserialize, Serialize};

use crate::error::SuppressionError;

/// Page size requested from paginated sources.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of suppressed addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionPage {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, alias = "next_token")]
    pub continuation_token: Option<String>,
}

/// A paginated source of suppressed addresses.
#[async_trait]
pub trait SuppressionSource: Send + Sync {
    /// Fetch the page following `continuation`, or the first page.
    ///
    /// # Errors
    ///
    /// Returns a [`SuppressionError`] if the page cannot be fetched.
    async fn fetch_page(&self, continuation: Option<&str>)
    -> Result<SuppressionPage, SuppressionError>;
}

/// Lower-cased suppressed addresses, held read-only for a run.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSnapshot {
    addresses: AHashSet<String>,
}

impl SuppressionSnapshot {
    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        self.addresses.contains(&normalize_email(email))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for SuppressionSnapshot {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            addresses: iter
                .into_iter()
                .map(|s| normalize_email(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Loads suppression snapshots from a source.
#[derive(Clone)]
pub struct SuppressionFilter {
    source: Arc<dyn SuppressionSource>,
}

impl SuppressionFilter {
    #[must_use]
    pub fn new(source: Arc<dyn SuppressionSource>) -> Self {
        Self { source }
    }

    /// Page through the source and collect every address.
    ///
    /// # Errors
    ///
    /// Fails on the first page that cannot be fetched, or if the source
    /// loops by repeating a continuation token.
    pub async fn load(&self) -> Result<SuppressionSnapshot, SuppressionError> {
        internal!(level = INFO, "Loading suppression list");

        let mut addresses = AHashSet::new();
        let mut seen_tokens = AHashSet::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0_usize;
        let mut total = 0_usize;

        loop {
            let page = self.source.fetch_page(continuation.as_deref()).await?;
            pages += 1;
            total += page.addresses.len();

            addresses.extend(
                page.addresses
                    .iter()
                    .map(|a| normalize_email(a))
                    .filter(|a| !a.is_empty()),
            );

            debug!(page = pages, entries = page.addresses.len(), "Suppression page received");

            match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    if !seen_tokens.insert(token.clone()) {
                        return Err(SuppressionError::RepeatedToken(token));
                    }
                    continuation = Some(token);
                }
                None => break,
            }
        }

        internal!(
            level = INFO,
            "Suppression list loaded: {total} entries across {pages} page(s), {} unique",
            addresses.len()
        );

        Ok(SuppressionSnapshot { addresses })
    }
}

/// Suppression list served by an HTTP endpoint returning
/// `{ "addresses": [...], "continuation_token": "..." }`.
#[derive(Debug, Clone)]
pub struct HttpSuppressionSource {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl HttpSuppressionSource {
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl SuppressionSource for HttpSuppressionSource {
    async fn fetch_page(
        &self,
        continuation: Option<&str>,
    ) -> Result<SuppressionPage, SuppressionError> {
        outgoing!("GET {} (continuation: {continuation:?})", self.url);

        let mut request = self
            .client
            .get(&self.url)
            .query(&[("page_size", self.page_size.to_string())]);

        if let Some(token) = continuation {
            request = request.query(&[("continuation_token", token)]);
        }

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SuppressionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<SuppressionPage>().await?)
    }
}

/// Newline-delimited local file of suppressed addresses, served as one page.
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Clone)]
pub struct FileSuppressionSource {
    path: PathBuf,
}

impl FileSuppressionSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SuppressionSource for FileSuppressionSource {
    async fn fetch_page(
        &self,
        _continuation: Option<&str>,
    ) -> Result<SuppressionPage, SuppressionError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let addresses = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect();

        Ok(SuppressionPage {
            addresses,
            continuation_token: None,
        })
    }
}
