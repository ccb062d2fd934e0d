use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use batch_image_compress::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgJobStore},
    pipeline, routes,
    services::{
        job_store::{InMemoryJobStore, JobStore},
        storage::{ArtifactSink, LocalDirSink, R2Client},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing batch-image-compress server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("batch_jobs_submitted_total", "Total batch jobs accepted");
    metrics::describe_counter!("batch_jobs_completed_total", "Batch jobs that ran to completion");
    metrics::describe_counter!("batch_jobs_failed_total", "Batch jobs that ended failed");
    metrics::describe_counter!(
        "batch_images_processed_total",
        "Image references processed, by outcome"
    );
    metrics::describe_counter!("batch_retries_total", "Retried fetch/store/job-store operations");
    metrics::describe_histogram!(
        "batch_job_duration_seconds",
        "Wall time from job start to terminal state"
    );
    metrics::describe_histogram!(
        "batch_image_bytes_saved",
        "Bytes saved per image by recompression"
    );

    // Job store: PostgreSQL when configured, otherwise process memory
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL job store");
            let pool = db::init_pool(url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            let store = PgJobStore::new(pool);
            let interrupted = store
                .fail_interrupted()
                .await
                .expect("Failed to resolve interrupted jobs");
            if interrupted > 0 {
                tracing::warn!(jobs = interrupted, "Marked jobs from a previous run as failed");
            }
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, job state will not survive restarts");
            Arc::new(InMemoryJobStore::new())
        }
    };

    // Artifact sink: R2 when fully configured, otherwise local directory
    let sink: Arc<dyn ArtifactSink> = match config.r2() {
        Some(r2) => {
            tracing::info!(bucket = r2.bucket, "Initializing R2 artifact storage");
            Arc::new(
                R2Client::new(r2.bucket, r2.endpoint, r2.access_key, r2.secret_key)
                    .expect("Failed to initialize R2 client"),
            )
        }
        None => {
            tracing::info!(dir = %config.artifact_dir, "Writing artifacts to local directory");
            Arc::new(
                LocalDirSink::new(&config.artifact_dir)
                    .await
                    .expect("Failed to create artifact directory"),
            )
        }
    };

    let runner = pipeline::build_runner(&config.pipeline(), store, sink)
        .expect("Failed to build batch pipeline");

    let app = routes::router(AppState::new(runner), prometheus_handle);

    tracing::info!("Starting batch-image-compress on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
