use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{ItemResult, Job, JobStatus};

/// Response after accepting a batch for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_items: Option<usize>,
    pub completed_items: usize,
    pub item_results: Vec<ItemResult>,
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total_items: job.total_items,
            completed_items: job.completed_items,
            item_results: job.item_results,
            error: job.error,
        }
    }
}
