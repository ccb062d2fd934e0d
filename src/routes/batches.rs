use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::submission::{JobStatusResponse, SubmitResponse};
use crate::services::job_store::JobStoreError;

/// POST /api/v1/batches: upload a CSV batch for processing.
pub async fn submit_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let mut source: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() == Some("file") {
            let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            source = Some(text);
        }
    }

    let source = source.ok_or(StatusCode::BAD_REQUEST)?;

    let job_id = state.runner.submit(source).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to create batch job");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
            message: "Batch accepted for processing".to_string(),
        }),
    ))
}

/// GET /api/v1/batches/{job_id}: current snapshot of a batch job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state.runner.get_status(job_id).await.map_err(store_error_status)?;
    Ok(Json(job.into()))
}

/// POST /api/v1/batches/{job_id}/cancel: abandon a running batch job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state.runner.cancel(job_id).await.map_err(store_error_status)?;
    Ok(Json(job.into()))
}

fn store_error_status(err: JobStoreError) -> StatusCode {
    match err {
        JobStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        e => {
            tracing::error!(error = %e, "Job store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
