//! Batch driver
//!
//! One run opens a batch, selects the due credentials, dispatches renewals
//! and commits. In drain mode the run repeats with a fresh selection until
//! nothing is due.

use chrono::Utc;
use common::store::{CredentialBatch, CredentialStore, DueFilter};
use common::StoreResult;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::RefresherConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::renewal::Renewer;

/// How many batches one run processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One batch of at most `page_size` credentials
    #[default]
    SinglePass,
    /// Batches until a selection comes back empty
    Drain,
}

/// Result of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub report: DispatchReport,
    pub elapsed: Duration,
}

/// Drives renewal runs against a credential store
pub struct BatchDriver<S: CredentialStore, R: Renewer> {
    store: S,
    dispatcher: Dispatcher<R>,
    config: RefresherConfig,
}

impl<S, R> BatchDriver<S, R>
where
    S: CredentialStore + 'static,
    R: Renewer,
{
    pub fn new(store: S, dispatcher: Dispatcher<R>, config: RefresherConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Perform one run in the configured mode
    pub async fn run(&self) -> StoreResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut attempted: Vec<i64> = Vec::new();

        loop {
            let selected = self.run_batch(&mut attempted, &mut summary.report).await?;
            if selected == 0 {
                break;
            }
            summary.batches += 1;

            if self.config.mode == RunMode::SinglePass {
                break;
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            "Took {:.3}s: {} batches, {} renewed, {} invalidated, {} unchanged, {} failed, {} skipped",
            summary.elapsed.as_secs_f64(),
            summary.batches,
            summary.report.renewed,
            summary.report.invalidated,
            summary.report.unchanged,
            summary.report.failed,
            summary.report.skipped
        );

        Ok(summary)
    }

    /// Process one batch; returns the number of credentials selected
    async fn run_batch(
        &self,
        attempted: &mut Vec<i64>,
        report: &mut DispatchReport,
    ) -> StoreResult<usize> {
        let mut batch = self.store.begin().await?;

        let filter = DueFilter::new(self.config.credential_key.as_str(), self.config.page_size)
            .due_before(self.config.due_before(Utc::now()))
            .excluding(attempted.iter().copied());

        let credentials = match batch.select_due(&filter).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Selecting due cookies failed, rolling back: {}", e);
                rollback(batch).await;
                return Err(e);
            }
        };

        if credentials.is_empty() {
            info!("All cookies were updated");
            batch.rollback().await?;
            return Ok(0);
        }

        info!("Refreshing {} cookies", credentials.len());
        attempted.extend(credentials.iter().map(|credential| credential.id));

        let batch_report = self.dispatcher.dispatch(&credentials, &mut batch).await;
        report.absorb(&batch_report);

        batch.commit().await.inspect_err(|e| {
            error!("Updating cookies failed with detail {}", e);
        })?;

        Ok(credentials.len())
    }
}

async fn rollback<B: CredentialBatch>(batch: B) {
    if let Err(e) = batch.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}

/// Run `driver` on a cron schedule until the returned scheduler is shut down
pub async fn start_schedule<S, R>(
    driver: Arc<BatchDriver<S, R>>,
    schedule: &str,
) -> anyhow::Result<JobScheduler>
where
    S: CredentialStore + 'static,
    R: Renewer,
{
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_, _| {
        let driver = Arc::clone(&driver);
        Box::pin(async move {
            info!("Cookie renewal job executed");
            if let Err(e) = driver.run().await {
                error!("Cookie renewal run failed: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started cookie renewal scheduler with schedule: {}", schedule);
    Ok(scheduler)
}
