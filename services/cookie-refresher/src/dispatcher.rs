//! Renewal dispatcher
//!
//! Fans one renewal call per credential out onto a bounded set of tasks and
//! folds the results into the batch buffer as they complete. Workers only
//! see an owned copy of their row; the batch is touched by the collecting
//! loop alone.

use common::{Credential, CredentialBatch, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::renewal::{RenewalError, Renewer};

/// Per-outcome counters of one or more batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub renewed: usize,
    pub invalidated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchReport {
    pub fn absorb(&mut self, other: &DispatchReport) {
        self.renewed += other.renewed;
        self.invalidated += other.invalidated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.renewed + self.invalidated + self.unchanged + self.failed + self.skipped
    }
}

struct RenewalJob {
    group: String,
    key: String,
    cookie: String,
}

type JobResult = (String, String, Result<Outcome, RenewalError>);

/// Bounded fan-out of renewal calls
pub struct Dispatcher<R: Renewer> {
    renewer: Arc<R>,
    max_workers: usize,
    call_timeout: Duration,
}

impl<R: Renewer> Dispatcher<R> {
    pub fn new(renewer: Arc<R>, max_workers: usize, call_timeout: Duration) -> Self {
        Self {
            renewer,
            max_workers: max_workers.max(1),
            call_timeout,
        }
    }

    /// Renew every credential and buffer the resulting writes into `batch`.
    ///
    /// Per-credential failures are logged and counted, never returned. The
    /// batch is left open for the caller to commit.
    pub async fn dispatch<B: CredentialBatch>(
        &self,
        credentials: &[Credential],
        batch: &mut B,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<JobResult> = JoinSet::new();

        for credential in credentials {
            let Some(cookie) = credential.renewable_value() else {
                info!("[{}] Skipping empty cookie", credential.group);
                report.skipped += 1;
                continue;
            };

            let job = RenewalJob {
                group: credential.group.clone(),
                key: credential.key.clone(),
                cookie: cookie.to_string(),
            };
            let renewer = Arc::clone(&self.renewer);
            let semaphore = Arc::clone(&semaphore);
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result =
                    match tokio::time::timeout(call_timeout, renewer.renew(&job.group, &job.cookie))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RenewalError::Timeout),
                    };
                (job.group, job.key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((group, key, Ok(outcome))) => {
                    match &outcome {
                        Outcome::Renewed { .. } => {
                            info!("[{}] Refreshing cookie completed", group);
                            report.renewed += 1;
                        }
                        Outcome::Invalid(reason) => {
                            info!("[{}] Cookie is not valid ({}), deactivating", group, reason);
                            report.invalidated += 1;
                        }
                        Outcome::NoChange => {
                            info!("[{}] No refreshed cookie", group);
                            report.unchanged += 1;
                        }
                    }
                    batch.apply_outcome(&group, &key, &outcome);
                }
                Ok((group, _, Err(e))) => {
                    warn!("[{}] Renewal failed, retrying next run: {}", group, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Renewal task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
