//! Test helper utilities for pipeline and API tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use batch_image_compress::{
    models::job::Job,
    pipeline::{self, JobRunner, PipelineConfig},
    services::{
        job_store::InMemoryJobStore,
        storage::{ArtifactSink, StoreError},
    },
};

/// Artifact sink that keeps everything in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub artifacts: Mutex<Vec<Vec<u8>>>,
    pub puts: AtomicUsize,
}

#[async_trait]
impl ArtifactSink for RecordingSink {
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst);
        self.artifacts.lock().unwrap().push(bytes.to_vec());
        Ok(format!("memory://artifacts/{n}.jpg"))
    }
}

/// Pipeline settings tuned for tests: short timeouts and tiny backoff.
pub fn test_pipeline_config(batch_concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        batch_concurrency,
        item_concurrency: 2,
        fetch_timeout: Duration::from_millis(300),
        fetch_max_attempts: 2,
        retry_base_delay: Duration::from_millis(5),
        ..PipelineConfig::default()
    }
}

/// Build a runner over an in-memory store and a recording sink.
pub fn build_test_runner(batch_concurrency: usize) -> (Arc<JobRunner>, Arc<RecordingSink>) {
    build_test_runner_with(&test_pipeline_config(batch_concurrency))
}

pub fn build_test_runner_with(config: &PipelineConfig) -> (Arc<JobRunner>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let runner = pipeline::build_runner(config, Arc::new(InMemoryJobStore::new()), sink.clone())
        .expect("build runner");
    (runner, sink)
}

/// Serve `body` as a PNG at `image_path`.
pub async fn mount_image(server: &MockServer, image_path: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(body),
        )
        .mount(server)
        .await;
}

/// Serve a response slower than the test fetch timeout.
pub async fn mount_slow(server: &MockServer, image_path: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(server)
        .await;
}

/// Poll job status until it reaches a terminal state, checking on every
/// poll that status never moves backwards.
pub async fn wait_for_terminal(runner: &JobRunner, job_id: Uuid, timeout_secs: u64) -> Job {
    let max_attempts = timeout_secs * 50; // Poll every 20ms
    let mut last_rank = 0;

    for _ in 0..max_attempts {
        let job = runner.get_status(job_id).await.expect("job must exist");

        let rank = status_rank(&job);
        assert!(rank >= last_rank, "job status regressed to {}", job.status);
        last_rank = rank;

        if let Some(total) = job.total_items {
            assert!(job.item_results.len() <= total);
        }

        if job.status.is_terminal() {
            return job;
        }
        sleep(Duration::from_millis(20)).await;
    }

    panic!("Job {job_id} did not finish within {timeout_secs} seconds");
}

fn status_rank(job: &Job) -> u8 {
    use batch_image_compress::models::job::JobStatus::*;
    match job.status {
        Pending => 0,
        Processing => 1,
        Completed | Failed => 2,
    }
}
