//! Batch job pipeline: item workers, the scheduler that bounds them, and the
//! runner that drives a job through its state machine.

pub mod item_worker;
pub mod runner;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use crate::services::fetcher::{FetchError, HttpFetcher};
use crate::services::job_store::JobStore;
use crate::services::retry::RetryPolicy;
use crate::services::storage::ArtifactSink;
use crate::services::transformer::{TransformError, Transformer};

pub use item_worker::ItemWorker;
pub use runner::JobRunner;
pub use scheduler::BatchScheduler;

/// Tuning for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_concurrency: usize,
    pub item_concurrency: usize,
    pub fetch_timeout: Duration,
    pub fetch_max_attempts: u32,
    pub max_image_bytes: u64,
    pub jpeg_quality: u8,
    pub max_output_bytes: usize,
    pub store_max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 8,
            item_concurrency: 4,
            fetch_timeout: Duration::from_secs(30),
            fetch_max_attempts: 3,
            max_image_bytes: 20 * 1024 * 1024,
            jpeg_quality: 50,
            max_output_bytes: 512 * 1024,
            store_max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// Assemble an HTTP-fetching job runner over `store` and `sink`.
pub fn build_runner(
    config: &PipelineConfig,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ArtifactSink>,
) -> Result<Arc<JobRunner>, PipelineError> {
    let fetcher = HttpFetcher::new(
        config.fetch_timeout,
        config.max_image_bytes,
        RetryPolicy::new(config.fetch_max_attempts, config.retry_base_delay),
    )?;
    let transformer = Transformer::new(config.jpeg_quality, config.max_output_bytes)?;
    let store_retry = RetryPolicy::new(config.store_max_attempts, config.retry_base_delay);

    let worker = ItemWorker::new(
        Arc::new(fetcher),
        transformer,
        sink,
        store_retry,
        config.item_concurrency,
    );

    Ok(Arc::new(JobRunner::new(
        store,
        BatchScheduler::new(Arc::new(worker)),
        config.batch_concurrency,
        store_retry,
    )))
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetcher(#[from] FetchError),

    #[error(transparent)]
    Transformer(#[from] TransformError),
}
