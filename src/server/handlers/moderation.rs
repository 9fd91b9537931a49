use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::moderation::ReportSubmission;
use crate::server::AppState;

use super::AuthenticatedUser;

#[derive(Debug, Deserialize)]
pub struct SubmitReportRequest {
    pub job_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitReportResponse {
    pub immediate_action: bool,
}

pub async fn submit_report(
    State(state): State<AppState>,
    AuthenticatedUser(reporter): AuthenticatedUser,
    Json(request): Json<SubmitReportRequest>,
) -> Result<Json<SubmitReportResponse>, ApiError> {
    // The job must exist and be public; reports against private jobs are
    // rejected so reporting can't be used to probe other users' jobs.
    let job = state.job_store.get(request.job_id).await?;
    if !job.is_public {
        return Err(ApiError::NotFound);
    }

    let similar_reports = sqlx::query_as::<_, (i64,)>(
        "SELECT count(*) FROM moderation_reports WHERE job_id = $1",
    )
    .bind(request.job_id)
    .fetch_one(&state.pool)
    .await
    .map_err(anyhow::Error::from)?
    .0;

    let immediate_action = state
        .moderation
        .submit_report(
            request.job_id,
            &reporter,
            &request.reason,
            ReportSubmission {
                similar_reports: similar_reports as u32,
                // Account age isn't available from the upstream gateway yet;
                // treat every reporter as newly created, the least-trusted band.
                reporter_account_age_days: 0,
            },
        )
        .await?;

    Ok(Json(SubmitReportResponse { immediate_action }))
}
