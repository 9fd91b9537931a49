use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admission::DUPLICATE_SUBMISSION_WINDOW;
use crate::domain::{Job, JobKind, JobParams, JobState, JobStatusUpdate};
use crate::error::ApiError;
use crate::notification::{Notification, NotificationCategory};
use crate::rate_limit::Tier;
use crate::server::AppState;

use super::AuthenticatedUser;

#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self { job }
    }
}

/// A resubmission of the same prompt by the same owner within the duplicate
/// window returns the existing job instead of admitting a new one.
async fn check_duplicate(
    state: &AppState,
    owner: &str,
    prompt: &str,
) -> Result<Option<Job>, ApiError> {
    state
        .job_store
        .get_recent_by_owner_and_prompt(owner, prompt, DUPLICATE_SUBMISSION_WINDOW.as_secs() as i64)
        .await
        .map_err(Into::into)
}

fn queue_error_for(kind: JobKind, message: String) -> ApiError {
    match kind {
        JobKind::Image => ApiError::ImageQueueError(message),
        JobKind::Video => ApiError::VideoQueueError(message),
        JobKind::Training => ApiError::ImageQueueError(message),
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn submit(
    state: AppState,
    owner: String,
    kind: JobKind,
    params: JobParams,
    idempotency_key: Option<String>,
) -> Result<Json<JobView>, ApiError> {
    if let Some(ref key) = idempotency_key {
        if let Some(job_id) = state.idempotency.lookup(&owner, key).await.map_err(anyhow::Error::from)? {
            let job = state.job_store.get(job_id).await?;
            return Ok(Json(job.into()));
        }
    }

    if let Some(existing) = check_duplicate(&state, &owner, &params.prompt).await? {
        return Ok(Json(existing.into()));
    }

    let job = state
        .admission
        .submit(&owner, kind, params, Tier::Base)
        .await
        .map_err(|e| match e {
            crate::admission::AdmissionError::Validation(msg) => ApiError::Validation(msg),
            crate::admission::AdmissionError::InsufficientCredits => ApiError::InsufficientCredits,
            crate::admission::AdmissionError::RateLimited { retry_after_ms } => {
                ApiError::RateLimited { retry_after_ms }
            }
            crate::admission::AdmissionError::Internal(e) => queue_error_for(kind, e.to_string()),
        })?;

    if let Some(key) = idempotency_key {
        state
            .idempotency
            .record(&owner, &key, job.id)
            .await
            .map_err(anyhow::Error::from)?;
    }

    Ok(Json(job.into()))
}

pub async fn submit_image(
    State(state): State<AppState>,
    AuthenticatedUser(owner): AuthenticatedUser,
    headers: HeaderMap,
    Json(params): Json<JobParams>,
) -> Result<Json<JobView>, ApiError> {
    let key = idempotency_key(&headers);
    submit(state, owner, JobKind::Image, params, key).await
}

pub async fn submit_video(
    State(state): State<AppState>,
    AuthenticatedUser(owner): AuthenticatedUser,
    headers: HeaderMap,
    Json(params): Json<JobParams>,
) -> Result<Json<JobView>, ApiError> {
    let key = idempotency_key(&headers);
    submit(state, owner, JobKind::Video, params, key).await
}

pub async fn get_job(
    State(state): State<AppState>,
    AuthenticatedUser(owner): AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.job_store.get(job_id).await?;
    if job.owner != owner {
        return Err(ApiError::NotOwner);
    }
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

pub async fn history(
    State(state): State<AppState>,
    AuthenticatedUser(owner): AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let jobs = state
        .job_store
        .list_by_owner(&owner, query.limit.clamp(1, 200))
        .await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    AuthenticatedUser(owner): AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.job_store.get(job_id).await?;

    if job.owner != owner {
        return Err(ApiError::NotOwner);
    }
    if job.state.is_terminal() {
        return Err(ApiError::NotCancellable);
    }

    let updated = state
        .job_store
        .update_status(job_id, JobStatusUpdate::to_cancelled("cancelled by owner"))
        .await
        .map_err(|e| ApiError::JobCancelError(e.to_string()))?;

    if job.state != JobState::Completed {
        state
            .ledger
            .refund(&owner, job.cost, job_id, "job_cancelled")
            .await?;
    }

    state
        .notifications
        .dispatch(Notification {
            user_id: owner.clone(),
            category: NotificationCategory::JobCancelled,
            job_id,
            message: "your job was cancelled".to_string(),
        })
        .await;

    Ok(Json(updated.into()))
}
