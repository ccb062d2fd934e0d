use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::job::{ItemResult, Job, JobStatus};
use crate::services::job_store::{apply_update, JobStore, JobStoreError, JobUpdate};

const JOB_COLUMNS: &str =
    "id, status, total_items, completed_items, item_results, error, created_at, updated_at";

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fail every job a previous process left unfinished.
    ///
    /// Batch sources are not persisted, so such jobs can never resume.
    pub async fn fail_interrupted(&self) -> Result<u64, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE batch_jobs
            SET status = 'failed',
                error = 'interrupted by service restart',
                updated_at = NOW()
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn lock_job(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM batch_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(JobStoreError::NotFound(id))?;

        job_from_row(&row)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO batch_jobs (id, status)
            VALUES ($1, 'pending')
            ON CONFLICT (id) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(JobStoreError::AlreadyExists(id))?;

        job_from_row(&row)
    }

    async fn read(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM batch_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobStoreError::NotFound(id))?;

        job_from_row(&row)
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let current = Self::lock_job(&mut tx, id).await?;
        // Dropping `tx` on error rolls back and releases the row lock.
        let next = apply_update(&current, update)?;
        let total_items = next
            .total_items
            .map(|n| to_db_count(n, "total_items"))
            .transpose()?;
        let completed_items = to_db_count(next.completed_items, "completed_items")?;

        sqlx::query(
            r#"
            UPDATE batch_jobs
            SET status = $1,
                total_items = $2,
                completed_items = $3,
                item_results = $4,
                error = $5,
                updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(next.status.to_string())
        .bind(total_items)
        .bind(completed_items)
        .bind(Json(&next.item_results))
        .bind(next.error.as_deref())
        .bind(next.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| JobStoreError::Corrupt(format!("unknown status '{status}'")))?;

    let total_items: Option<i32> = row.try_get("total_items")?;
    let completed_items: i32 = row.try_get("completed_items")?;
    let Json(item_results): Json<Vec<ItemResult>> = row.try_get("item_results")?;

    Ok(Job {
        id: row.try_get("id")?,
        status,
        total_items: total_items
            .map(|n| from_db_count(n, "total_items"))
            .transpose()?,
        completed_items: from_db_count(completed_items, "completed_items")?,
        item_results,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn to_db_count(n: usize, column: &str) -> Result<i32, JobStoreError> {
    i32::try_from(n).map_err(|_| JobStoreError::Corrupt(format!("{column} {n} exceeds INT range")))
}

fn from_db_count(n: i32, column: &str) -> Result<usize, JobStoreError> {
    usize::try_from(n).map_err(|_| JobStoreError::Corrupt(format!("negative {column}: {n}")))
}
