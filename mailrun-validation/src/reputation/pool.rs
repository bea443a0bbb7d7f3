//! Bounded worker pool for reputation checks.
//!
//! A fixed number of workers drain a shared cursor over the input. Each
//! worker hands back its results tagged with the item's position, and the
//! slots are filled once the workers are joined, so the output preserves
//! input order regardless of completion order.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use mailrun_common::{
    Contact, internal,
    tracing::{error, warn},
};
use tokio::task::JoinSet;

use super::{ReputationReport, ReputationService};

/// How often progress is logged, in items.
const PROGRESS_INTERVAL: usize = 250;

/// Result of checking one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReputationOutcome {
    Checked(ReputationReport),
    /// The request failed; the message is kept for the failures report.
    Failed(String),
}

/// Check every contact with at most `concurrency` requests in flight.
///
/// The returned outcomes are aligned with `contacts`.
pub async fn check_all(
    service: Arc<dyn ReputationService>,
    contacts: &[Contact],
    concurrency: usize,
) -> Vec<ReputationOutcome> {
    let total = contacts.len();
    if total == 0 {
        return Vec::new();
    }

    let emails: Arc<Vec<String>> = Arc::new(contacts.iter().map(|c| c.email.clone()).collect());
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = concurrency.clamp(1, total);

    internal!(level = INFO, "Checking {total} address(es) with {workers} worker(s)");

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let service = Arc::clone(&service);
        let emails = Arc::clone(&emails);
        let cursor = Arc::clone(&cursor);

        set.spawn(async move {
            let mut checked = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(email) = emails.get(index) else {
                    break;
                };

                let outcome = match service.check(email).await {
                    Ok(report) => ReputationOutcome::Checked(report),
                    Err(e) => {
                        warn!(
                            index,
                            email = %email,
                            temporary = e.is_temporary(),
                            error = %e,
                            "Reputation check failed"
                        );
                        ReputationOutcome::Failed(e.to_string())
                    }
                };

                checked.push((index, outcome));

                if index % PROGRESS_INTERVAL == 0 {
                    internal!(level = INFO, "Checked {index}/{}", emails.len());
                }
            }
            checked
        });
    }

    let mut slots: Vec<Option<ReputationOutcome>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(checked) => {
                for (index, outcome) in checked {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(outcome);
                    }
                }
            }
            Err(e) => error!(error = %e, "Reputation worker terminated abnormally"),
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| ReputationOutcome::Failed("worker aborted".to_string())))
        .collect()
}
