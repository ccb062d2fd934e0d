//! Job store: the single synchronization point between the job runner
//! (writer) and status queries (readers).

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

/// Mutation applied to a job under its store lock. Returning an error
/// aborts the write and leaves the stored record unchanged.
pub type JobUpdate = Box<dyn FnOnce(&mut Job) -> Result<(), JobStoreError> + Send>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `Pending` job.
    async fn create(&self, id: Uuid) -> Result<Job, JobStoreError>;

    async fn read(&self, id: Uuid) -> Result<Job, JobStoreError>;

    /// Atomically apply `update` to the job and return the stored result.
    ///
    /// Implementations reject updates that move `status` backwards.
    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Job, JobStoreError>;

    async fn health_check(&self) -> Result<(), JobStoreError>;
}

/// Run `update` on a copy of `current`, enforcing the monotonic status rule.
/// Shared by every store backend.
pub(crate) fn apply_update(current: &Job, update: JobUpdate) -> Result<Job, JobStoreError> {
    let mut next = current.clone();
    update(&mut next)?;

    if current.status.regresses_to(next.status) {
        return Err(JobStoreError::InvalidTransition {
            id: current.id,
            from: current.status,
            to: next.status,
        });
    }

    next.id = current.id;
    next.created_at = current.created_at;
    next.updated_at = Utc::now();
    Ok(next)
}

/// Process-local job store backed by a sharded concurrent map.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, id: Uuid) -> Result<Job, JobStoreError> {
        match self.jobs.entry(id) {
            Entry::Occupied(_) => Err(JobStoreError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let job = Job::new(id);
                slot.insert(job.clone());
                Ok(job)
            }
        }
    }

    async fn read(&self, id: Uuid) -> Result<Job, JobStoreError> {
        self.jobs
            .get(&id)
            .map(|job| job.clone())
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Job, JobStoreError> {
        // The shard write lock is held for the whole read-modify-write.
        let mut entry = self.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        let next = apply_update(&entry, update)?;
        *entry = next.clone();
        Ok(next)
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to (de)serialize job record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

impl JobStoreError {
    /// Backend faults may clear up; logical rejections never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{ItemResult, JobStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_read() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();

        let created = store.create(id).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);

        let read = store.read(id).await.unwrap();
        assert_eq!(read.id, id);
        assert!(matches!(
            store.create(id).await,
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.read(id).await, Err(JobStoreError::NotFound(_))));
        assert!(matches!(
            store.update(id, Box::new(|_| Ok(()))).await,
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_record_untouched() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let result = store
            .update(
                id,
                Box::new(|job| {
                    job.completed_items = 99;
                    job.transition(JobStatus::Completed)
                }),
            )
            .await;

        assert!(matches!(result, Err(JobStoreError::InvalidTransition { .. })));
        let job = store.read(id).await.unwrap();
        assert_eq!(job.completed_items, 0);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_regression_rejected_even_without_transition_helper() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();
        store
            .update(id, Box::new(|job| job.transition(JobStatus::Processing)))
            .await
            .unwrap();

        let result = store
            .update(
                id,
                Box::new(|job| {
                    job.status = JobStatus::Pending;
                    Ok(())
                }),
            )
            .await;
        assert!(matches!(result, Err(JobStoreError::InvalidTransition { .. })));
        assert_eq!(store.read(id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        id,
                        Box::new(move |job| {
                            job.completed_items += 1;
                            job.item_results.push(ItemResult::faulted(format!("item-{i}"), "x"));
                            Ok(())
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let job = store.read(id).await.unwrap();
        assert_eq!(job.completed_items, 64);
        assert_eq!(job.item_results.len(), 64);
    }
}
