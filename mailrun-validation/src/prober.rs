//! Domain deliverability probing.
//!
//! Each uncached domain walks a small state machine:
//!
//! ```text
//! TryMx ──ok──────────────────────────────▶ Done(reachable via MX)
//!   │ failed
//!   ├─ strict:  attempts left ? TryMx : Done(unreachable)
//!   └─ lenient: TryFallback
//!
//! TryFallback ──A or AAAA ok──────────────▶ Done(reachable via fallback)
//!   │ failed
//!   └─ attempts left ? TryMx : Done(unreachable)
//! ```
//!
//! Every query runs under the configured deadline; a query that misses it is
//! abandoned and counts as a failed attempt. The verdict, positive or not, is
//! cached exactly once per normalised domain.

use std::sync::Arc;

use mailrun_common::{Domain, tracing::debug};

use crate::{
    cache::{DomainCache, DomainVerdict, ProbeMethod},
    dns::{DnsError, DomainPolicy, MailResolver, ProbeConfig, RecordKind, normalize_domain},
};

#[derive(Debug)]
enum ProbeState {
    TryMx,
    TryFallback,
    Done(DomainVerdict),
}

/// Resolves whether domains can receive mail, caching verdicts for the
/// lifetime of the prober.
pub struct DeliverabilityProber {
    resolver: Arc<dyn MailResolver>,
    config: ProbeConfig,
    cache: DomainCache,
}

impl DeliverabilityProber {
    #[must_use]
    pub fn new(resolver: Arc<dyn MailResolver>, config: ProbeConfig) -> Self {
        Self {
            resolver,
            config,
            cache: DomainCache::new(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &DomainCache {
        &self.cache
    }

    /// Probe a raw domain, returning the cached verdict when one exists.
    ///
    /// Never fails: resolver errors and timeouts are folded into an
    /// unreachable verdict.
    pub async fn probe(&mut self, domain_raw: &str) -> DomainVerdict {
        let domain = normalize_domain(domain_raw);

        if let Some(cached) = self.cache.get(&domain) {
            debug!(domain = %domain, reachable = cached.reachable, "Domain verdict cache hit");
            return cached.clone();
        }

        let verdict = if domain.is_empty() {
            DomainVerdict::unreachable(domain, "empty domain")
        } else {
            self.resolve(&domain).await
        };

        debug!(
            domain = %verdict.domain,
            reachable = verdict.reachable,
            method = ?verdict.method,
            error = verdict.error.as_deref().unwrap_or_default(),
            "Domain probed"
        );

        self.cache.insert(verdict.clone());
        verdict
    }

    async fn resolve(&self, domain: &Domain) -> DomainVerdict {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;
        let mut last_error: Option<DnsError> = None;
        let mut state = ProbeState::TryMx;

        loop {
            state = match state {
                ProbeState::TryMx => match self.query(domain, RecordKind::Mx).await {
                    Ok(()) => ProbeState::Done(DomainVerdict::reachable(
                        domain.clone(),
                        ProbeMethod::Mx,
                    )),
                    Err(err) => {
                        debug!(
                            domain = %domain,
                            attempt,
                            timeout = err.is_timeout(),
                            error = %err,
                            "MX attempt failed"
                        );
                        last_error = Some(err);
                        match self.config.policy {
                            DomainPolicy::Lenient => ProbeState::TryFallback,
                            DomainPolicy::Strict => Self::retry_or_give_up(
                                domain,
                                &mut attempt,
                                max_attempts,
                                last_error.as_ref(),
                            ),
                        }
                    }
                },
                ProbeState::TryFallback => match self.query_fallback(domain).await {
                    Ok(()) => ProbeState::Done(DomainVerdict::reachable(
                        domain.clone(),
                        ProbeMethod::FallbackAddress,
                    )),
                    Err(err) => {
                        debug!(
                            domain = %domain,
                            attempt,
                            timeout = err.is_timeout(),
                            error = %err,
                            "Address fallback failed"
                        );
                        last_error = Some(err);
                        Self::retry_or_give_up(
                            domain,
                            &mut attempt,
                            max_attempts,
                            last_error.as_ref(),
                        )
                    }
                },
                ProbeState::Done(verdict) => return verdict,
            };
        }
    }

    fn retry_or_give_up(
        domain: &Domain,
        attempt: &mut u32,
        max_attempts: u32,
        last_error: Option<&DnsError>,
    ) -> ProbeState {
        if *attempt < max_attempts {
            *attempt += 1;
            return ProbeState::TryMx;
        }

        let message = last_error.map_or_else(
            || format!("no mail servers found for {domain}"),
            ToString::to_string,
        );
        ProbeState::Done(DomainVerdict::unreachable(domain.clone(), message))
    }

    /// A then AAAA; the first non-empty answer wins.
    async fn query_fallback(&self, domain: &Domain) -> Result<(), DnsError> {
        match self.query(domain, RecordKind::A).await {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(
                    domain = %domain,
                    timeout = err.is_timeout(),
                    error = %err,
                    "A lookup failed, trying AAAA"
                );
                self.query(domain, RecordKind::Aaaa).await
            }
        }
    }

    async fn query(&self, domain: &Domain, kind: RecordKind) -> Result<(), DnsError> {
        let deadline = self.config.timeout();

        match tokio::time::timeout(deadline, self.resolver.lookup(kind, domain.as_str())).await {
            Err(_elapsed) => Err(DnsError::Timeout {
                domain: domain.to_string(),
                kind,
                after_ms: self.config.timeout_ms,
            }),
            Ok(Ok(0)) => Err(DnsError::NoRecords {
                domain: domain.to_string(),
                kind,
            }),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use ahash::AHashMap;
    use async_trait::async_trait;

    use super::*;

    /// Scripted answers per (kind, domain); unknown pairs fail the lookup.
    #[derive(Default)]
    struct ScriptedResolver {
        answers: AHashMap<(RecordKind, String), Result<usize, DnsError>>,
        hang: Vec<(RecordKind, String)>,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn answer(mut self, kind: RecordKind, domain: &str, answer: Result<usize, DnsError>) -> Self {
            self.answers.insert((kind, domain.to_string()), answer);
            self
        }

        fn hang(mut self, kind: RecordKind, domain: &str) -> Self {
            self.hang.push((kind, domain.to_string()));
            self
        }
    }

    #[async_trait]
    impl MailResolver for ScriptedResolver {
        async fn lookup(&self, kind: RecordKind, domain: &str) -> Result<usize, DnsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.hang.contains(&(kind, domain.to_string())) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            self.answers
                .get(&(kind, domain.to_string()))
                .cloned()
                .unwrap_or_else(|| Err(DnsError::LookupFailed("SERVFAIL".to_string())))
        }
    }

    fn prober(resolver: &Arc<ScriptedResolver>, policy: DomainPolicy) -> DeliverabilityProber {
        DeliverabilityProber::new(
            Arc::clone(resolver) as Arc<dyn MailResolver>,
            ProbeConfig {
                policy,
                timeout_ms: 100,
                retries: 2,
                nameservers: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_mx_success() {
        let resolver =
            Arc::new(ScriptedResolver::default().answer(RecordKind::Mx, "good.com", Ok(2)));
        let mut prober = prober(&resolver, DomainPolicy::Strict);

        let verdict = prober.probe("Good.COM").await;

        assert!(verdict.reachable);
        assert_eq!(verdict.method, ProbeMethod::Mx);
        assert_eq!(verdict.domain.as_str(), "good.com");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strict_retries_mx_only() {
        let resolver = Arc::new(
            ScriptedResolver::default()
                .answer(RecordKind::Mx, "nomx.com", Ok(0))
                .answer(RecordKind::A, "nomx.com", Ok(1)),
        );
        let mut prober = prober(&resolver, DomainPolicy::Strict);

        let verdict = prober.probe("nomx.com").await;

        assert!(!verdict.reachable);
        assert_eq!(verdict.method, ProbeMethod::None);
        assert_eq!(
            verdict.error.as_deref(),
            Some("No MX records found for domain: nomx.com")
        );
        // 1 attempt + 2 retries, never consulting A records
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lenient_falls_back_to_a() {
        let resolver = Arc::new(
            ScriptedResolver::default()
                .answer(RecordKind::Mx, "nomx.com", Ok(0))
                .answer(RecordKind::A, "nomx.com", Ok(1)),
        );
        let mut prober = prober(&resolver, DomainPolicy::Lenient);

        let verdict = prober.probe("nomx.com").await;

        assert!(verdict.reachable);
        assert_eq!(verdict.method, ProbeMethod::FallbackAddress);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lenient_falls_back_to_aaaa() {
        let resolver = Arc::new(
            ScriptedResolver::default()
                .answer(RecordKind::Mx, "v6.com", Ok(0))
                .answer(RecordKind::A, "v6.com", Ok(0))
                .answer(RecordKind::Aaaa, "v6.com", Ok(1)),
        );
        let mut prober = prober(&resolver, DomainPolicy::Lenient);

        let verdict = prober.probe("v6.com").await;

        assert!(verdict.reachable);
        assert_eq!(verdict.method, ProbeMethod::FallbackAddress);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lenient_retries_whole_sequence() {
        let resolver = Arc::new(ScriptedResolver::default());
        let mut prober = prober(&resolver, DomainPolicy::Lenient);

        let verdict = prober.probe("broken.com").await;

        assert!(!verdict.reachable);
        assert_eq!(
            verdict.error.as_deref(),
            Some("DNS lookup failed: SERVFAIL")
        );
        // (MX + A + AAAA) * 3 attempts
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let resolver = Arc::new(ScriptedResolver::default().hang(RecordKind::Mx, "slow.com"));
        let mut prober = prober(&resolver, DomainPolicy::Strict);

        let verdict = prober.probe("slow.com").await;

        assert!(!verdict.reachable);
        assert_eq!(
            verdict.error.as_deref(),
            Some("DNS MX query timed out after 100ms for domain: slow.com")
        );
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_retry_after_timeout() {
        // MX hangs, but lenient mode finds an A record on the same attempt
        let resolver = Arc::new(
            ScriptedResolver::default()
                .hang(RecordKind::Mx, "flaky.com")
                .answer(RecordKind::A, "flaky.com", Ok(1)),
        );
        let mut prober = prober(&resolver, DomainPolicy::Lenient);

        let verdict = prober.probe("flaky.com").await;
        assert!(verdict.reachable);
        assert_eq!(verdict.method, ProbeMethod::FallbackAddress);
    }

    #[tokio::test]
    async fn test_cache_prevents_requery() {
        let resolver = Arc::new(
            ScriptedResolver::default()
                .answer(RecordKind::Mx, "good.com", Ok(1))
                .answer(RecordKind::Mx, "bad.invalid", Err(DnsError::DomainNotFound("bad.invalid".to_string()))),
        );
        let mut prober = prober(&resolver, DomainPolicy::Strict);

        prober.probe("good.com").await;
        prober.probe("GOOD.com>").await;
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        prober.probe("bad.invalid").await;
        let calls_after_first_failure = resolver.calls.load(Ordering::SeqCst);
        let second = prober.probe("bad.invalid").await;

        assert!(!second.reachable);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), calls_after_first_failure);
        assert_eq!(prober.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_domain_skips_dns() {
        let resolver = Arc::new(ScriptedResolver::default());
        let mut prober = prober(&resolver, DomainPolicy::Lenient);

        let verdict = prober.probe(" <.> ").await;

        assert!(!verdict.reachable);
        assert_eq!(verdict.error.as_deref(), Some("empty domain"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let resolver = Arc::new(ScriptedResolver::default());
        let mut prober = DeliverabilityProber::new(
            Arc::clone(&resolver) as Arc<dyn MailResolver>,
            ProbeConfig {
                retries: 0,
                ..ProbeConfig::default()
            },
        );

        let verdict = prober.probe("once.com").await;
        assert!(!verdict.reachable);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
