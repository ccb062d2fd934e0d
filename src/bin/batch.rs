//! Run one batch file through the pipeline locally and print the finished job.
//!
//! Usage:
//!   batch products.csv --artifact-dir output --concurrency 8

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use batch_image_compress::{
    config::AppConfig,
    models::job::JobStatus,
    pipeline,
    services::{job_store::InMemoryJobStore, storage::LocalDirSink},
};

const POLL_INTERVAL_MS: u64 = 250;

#[derive(Parser, Debug)]
#[command(name = "batch", about = "Fetch, recompress and store every image in a CSV batch")]
struct Args {
    /// CSV batch source (serial, product name, comma-separated image URLs)
    source: PathBuf,

    /// Directory for compressed artifacts (defaults to ARTIFACT_DIR)
    #[arg(long, env = "ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Items processed concurrently (defaults to BATCH_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let mut pipeline_config = config.pipeline();
    if let Some(n) = args.concurrency {
        pipeline_config.batch_concurrency = n.max(1);
    }

    let source = match tokio::fs::read_to_string(&args.source).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(path = %args.source.display(), error = %e, "Cannot read batch source");
            return ExitCode::FAILURE;
        }
    };

    let artifact_dir = args
        .artifact_dir
        .unwrap_or_else(|| PathBuf::from(&config.artifact_dir));
    let sink = LocalDirSink::new(artifact_dir)
        .await
        .expect("Failed to create artifact directory");

    let runner = pipeline::build_runner(
        &pipeline_config,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(sink),
    )
    .expect("Failed to build batch pipeline");

    let job_id = match runner.submit(source).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to submit batch");
            return ExitCode::FAILURE;
        }
    };

    let job = loop {
        match runner.get_status(job_id).await {
            Ok(job) if job.status.is_terminal() => break job,
            Ok(job) => {
                tracing::debug!(
                    job_id = %job_id,
                    completed = job.completed_items,
                    total = ?job.total_items,
                    "Waiting for batch"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Lost track of job");
                return ExitCode::FAILURE;
            }
        }
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    };

    match serde_json::to_string_pretty(&job) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to render job"),
    }

    if job.status == JobStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
