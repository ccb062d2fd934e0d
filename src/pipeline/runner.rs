//! End-to-end orchestration of one batch job.
//!
//! ```text
//! Pending ──start──▶ Processing ──scheduler returned──▶ Completed
//!    │                   │
//!    └─parse error/store fault──▶ Failed ◀──scheduler/store fault, cancel
//! ```
//!
//! The runner is the only writer of a job's status and item results while it
//! runs, and it performs exactly one terminal write per job.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::scheduler::{BatchScheduler, Progress};
use crate::models::batch::BatchItem;
use crate::models::job::{ItemResult, Job, JobStatus};
use crate::services::job_store::{JobStore, JobStoreError, JobUpdate};
use crate::services::parser::{self, ParseError};
use crate::services::retry::RetryPolicy;

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    scheduler: BatchScheduler,
    batch_concurrency: usize,
    store_retry: RetryPolicy,
    handles: DashMap<Uuid, JoinHandle<()>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: BatchScheduler,
        batch_concurrency: usize,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            batch_concurrency: batch_concurrency.max(1),
            store_retry,
            handles: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Accept a batch: create the job, start it in the background and return
    /// its id. The job is readable before this returns.
    pub async fn submit(self: &Arc<Self>, source: String) -> Result<Uuid, JobStoreError> {
        let id = Uuid::new_v4();
        self.store.create(id).await?;
        metrics::counter!("batch_jobs_submitted_total").increment(1);

        // Hold the task until its handle is registered, so it can always be
        // found (and removed) by id.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;
            runner.run(id, source).await;
            runner.handles.remove(&id);
        });
        self.handles.insert(id, handle);
        let _ = registered_tx.send(());

        tracing::info!(job_id = %id, "Batch job accepted");
        Ok(id)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<Job, JobStoreError> {
        self.store.read(id).await
    }

    /// Abandon a running job and mark it `Failed`.
    ///
    /// In-flight work is aborted and its results are discarded. Terminal jobs
    /// are returned unchanged.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, JobStoreError> {
        if let Some((_, handle)) = self.handles.remove(&id) {
            handle.abort();
        }

        let result = self
            .store
            .update(
                id,
                Box::new(|job| {
                    job.transition(JobStatus::Failed)?;
                    job.error = Some("cancelled".to_string());
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(job) => {
                metrics::counter!("batch_jobs_failed_total").increment(1);
                tracing::info!(job_id = %id, "Batch job cancelled");
                Ok(job)
            }
            Err(JobStoreError::InvalidTransition { .. }) => self.store.read(id).await,
            Err(e) => Err(e),
        }
    }

    /// Run job `id` to a terminal state. A second call for a job that has
    /// already started is a no-op.
    pub async fn run(&self, id: Uuid, source: String) {
        let current = self
            .store_retry
            .run("job_read", || self.store.read(id), JobStoreError::is_retryable)
            .await;

        match current {
            Ok(job) if job.status == JobStatus::Pending => {}
            Ok(job) => {
                tracing::debug!(job_id = %id, status = %job.status, "Job already started, skipping");
                return;
            }
            Err(JobStoreError::NotFound(_)) => {
                tracing::error!(job_id = %id, "Cannot run unknown job");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Cannot load job");
                self.fail_job(id, format!("job store fault: {e}")).await;
                return;
            }
        }

        let started = Instant::now();
        let items = match parser::parse_batch(&source) {
            Ok(items) => items,
            Err(e) => {
                self.fail_unparsed(id, &e).await;
                return;
            }
        };

        let total = items.len();
        let start = self
            .store_retry
            .run(
                "job_start",
                || {
                    self.store.update(
                        id,
                        Box::new(move |job| {
                            job.transition(JobStatus::Processing)?;
                            job.total_items = Some(total);
                            Ok(())
                        }),
                    )
                },
                JobStoreError::is_retryable,
            )
            .await;

        match start {
            Ok(_) => {}
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                tracing::debug!(job_id = %id, status = %from, "Lost start race, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to mark job processing");
                self.fail_job(id, format!("job store fault: {e}")).await;
                return;
            }
        }

        tracing::info!(job_id = %id, items = total, "Batch job processing");

        let outcome = self.process(id, items).await;
        let terminal = match outcome {
            Ok(results) => {
                let completed = results.len();
                self.finish(id, move |job| {
                    job.completed_items = completed;
                    job.item_results = results;
                    job.transition(JobStatus::Completed)
                })
                .await
            }
            Err(reason) => {
                tracing::error!(job_id = %id, error = %reason, "Batch job failed");
                self.finish(id, move |job| {
                    job.transition(JobStatus::Failed)?;
                    job.error = Some(reason);
                    Ok(())
                })
                .await
            }
        };

        if let Some(job) = terminal {
            metrics::histogram!("batch_job_duration_seconds").record(started.elapsed().as_secs_f64());
            match job.status {
                JobStatus::Completed => {
                    metrics::counter!("batch_jobs_completed_total").increment(1);
                }
                _ => metrics::counter!("batch_jobs_failed_total").increment(1),
            }
            tracing::info!(
                job_id = %id,
                status = %job.status,
                items = job.item_results.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch job finished"
            );
        }
    }

    /// Schedule the items while publishing progress to the store.
    ///
    /// A progress write that still fails after retries ends the batch early:
    /// the scheduler is dropped, which aborts its in-flight items.
    async fn process(&self, id: Uuid, items: Vec<BatchItem>) -> Result<Vec<ItemResult>, String> {
        let (tx, rx) = mpsc::unbounded_channel();

        let scheduled = self.scheduler.run(items, self.batch_concurrency, Some(tx));
        let published = self.publish_progress(id, rx);
        tokio::pin!(scheduled);
        tokio::pin!(published);

        tokio::select! {
            results = &mut scheduled => {
                // The sender is gone once the scheduler returns; drain the rest.
                published.await.map_err(|e| format!("job store fault: {e}"))?;
                results.map_err(|e| format!("scheduler fault: {e}"))
            }
            drained = &mut published => {
                drained.map_err(|e| format!("job store fault: {e}"))?;
                scheduled.await.map_err(|e| format!("scheduler fault: {e}"))
            }
        }
    }

    /// Mirror scheduler progress into the job record. Each write is retried
    /// on transient store faults; the first write that still fails stops
    /// publishing and is returned.
    async fn publish_progress(
        &self,
        id: Uuid,
        mut rx: mpsc::UnboundedReceiver<Progress>,
    ) -> Result<(), JobStoreError> {
        while let Some(event) = rx.recv().await {
            let published = self
                .store_retry
                .run(
                    "job_progress",
                    || self.store.update(id, progress_update(&event)),
                    JobStoreError::is_retryable,
                )
                .await;

            if let Err(e) = published {
                tracing::warn!(job_id = %id, error = %e, "Failed to publish progress");
                return Err(e);
            }
        }

        Ok(())
    }

    /// Pending → Failed for a source that never parsed.
    async fn fail_unparsed(&self, id: Uuid, error: &ParseError) {
        tracing::warn!(job_id = %id, error = %error, "Batch source rejected");
        self.fail_job(id, format!("invalid batch source: {error}")).await;
    }

    /// Best-effort `Failed` write so the job never stays non-terminal.
    async fn fail_job(&self, id: Uuid, reason: String) {
        if self
            .finish(id, move |job| {
                job.transition(JobStatus::Failed)?;
                job.error = Some(reason);
                Ok(())
            })
            .await
            .is_some()
        {
            metrics::counter!("batch_jobs_failed_total").increment(1);
        }
    }

    /// Terminal write, retried on transient store faults.
    async fn finish<F>(&self, id: Uuid, update: F) -> Option<Job>
    where
        F: FnOnce(&mut Job) -> Result<(), JobStoreError> + Clone + Send + 'static,
    {
        let result = self
            .store_retry
            .run(
                "job_finish",
                || self.store.update(id, Box::new(update.clone())),
                JobStoreError::is_retryable,
            )
            .await;

        match result {
            Ok(job) => Some(job),
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                // Someone else (a cancel) already resolved the job.
                tracing::info!(job_id = %id, status = %from, "Job already terminal, result discarded");
                None
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
                None
            }
        }
    }
}

/// Fresh store update for one progress event. Built per attempt, since a
/// `JobUpdate` is consumed by the store.
fn progress_update(event: &Progress) -> JobUpdate {
    match event {
        Progress::ItemFinished { .. } => Box::new(|job| {
            job.require_status(JobStatus::Processing)?;
            job.completed_items += 1;
            Ok(())
        }),
        Progress::InOrder(result) => {
            let result = result.clone();
            Box::new(move |job| {
                job.require_status(JobStatus::Processing)?;
                if job.total_items.is_some_and(|total| job.item_results.len() >= total) {
                    return Err(JobStoreError::Corrupt(format!(
                        "job {} has more results than items",
                        job.id
                    )));
                }
                job.item_results.push(result);
                Ok(())
            })
        }
    }
}
