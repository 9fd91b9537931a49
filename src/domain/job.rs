use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Selects which queue a job is routed to. Also the job's durable `kind`
/// discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Image,
    Video,
    Training,
}

impl JobKind {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::Image => "image",
            JobKind::Video => "video",
            JobKind::Training => "training",
        }
    }

    pub fn dlq_name(&self) -> &'static str {
        match self {
            JobKind::Image => "image-dlq",
            JobKind::Video => "video-dlq",
            JobKind::Training => "training-dlq",
        }
    }
}

/// `state ∈ {pending, processing, completed, failed, cancelled}`.
/// `completed`, `failed`, `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Unknown,
    Approve,
    Flag,
    Review,
    Block,
}

impl Default for ModerationStatus {
    fn default() -> Self {
        ModerationStatus::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Basic,
    Standard,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    Inpaint,
    Outpaint,
    Restyle,
    BackgroundReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoGenerationType {
    TextToVideo,
    ImageToVideo,
    Keyframe,
    FrameInterpolation,
}

/// Immutable normalized request parameters. The only mutation this ever
/// sees after creation is the caption-enrichment append, which is recorded
/// on a transient copy — never written back onto the canonical `params`
/// column in the Job Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality: Option<Quality>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub init_image_url: Option<String>,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub caption_init_image: bool,
    #[serde(default)]
    pub edit_type: Option<EditType>,
    #[serde(default)]
    pub generation_type: Option<VideoGenerationType>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub training_steps: Option<u32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Structured failure reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// Populated once on transition to completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub media_url: String,
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    pub kind: JobKind,
    #[sqlx(json)]
    pub params: JobParams,
    pub cost: i64,
    pub state: JobState,
    pub progress: i32,
    pub attempts: i32,
    pub provider: Option<String>,
    #[sqlx(json)]
    pub result: Option<JobResult>,
    #[sqlx(json)]
    pub error: Option<JobError>,
    pub moderation: ModerationStatus,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A proposed mutation to a Job, applied transactionally by the Job Store
/// with monotonicity and terminal-state checks.
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub state: Option<JobState>,
    pub progress: Option<i32>,
    pub provider: Option<String>,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub moderation: Option<ModerationStatus>,
    pub is_public: Option<bool>,
}

impl JobStatusUpdate {
    pub fn progress_to(progress: i32) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn to_processing() -> Self {
        Self {
            state: Some(JobState::Processing),
            progress: Some(0),
            ..Default::default()
        }
    }

    pub fn to_completed(result: JobResult, provider: String) -> Self {
        Self {
            state: Some(JobState::Completed),
            progress: Some(100),
            provider: Some(provider),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn to_failed(error: JobError) -> Self {
        Self {
            state: Some(JobState::Failed),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn to_cancelled(reason: &str) -> Self {
        Self {
            state: Some(JobState::Cancelled),
            error: Some(JobError {
                code: "CANCELLED".to_string(),
                message: reason.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// Validates a proposed transition against the current job's invariants.
/// Returns `Err` with a human-readable reason on violation. Illegal
/// transitions are rejected outright rather than silently coerced.
pub fn validate_transition(current: &Job, update: &JobStatusUpdate) -> Result<(), String> {
    // The moderation engine writes moderation/is_public after a job has
    // already reached its terminal state; that's the one update shape
    // terminal jobs still accept.
    let moderation_only = update.state.is_none()
        && update.progress.is_none()
        && update.result.is_none()
        && update.error.is_none()
        && update.provider.is_none()
        && (update.moderation.is_some() || update.is_public.is_some());

    if current.state.is_terminal() && !moderation_only {
        return Err(format!(
            "job {} is already in terminal state {:?}; no further updates accepted",
            current.id, current.state
        ));
    }

    if let Some(new_progress) = update.progress {
        if new_progress < current.progress {
            return Err(format!(
                "progress would decrease from {} to {} on job {}",
                current.progress, new_progress, current.id
            ));
        }
        if !(0..=100).contains(&new_progress) {
            return Err(format!("progress {new_progress} out of range 0..=100"));
        }
    }

    if let Some(new_state) = update.state {
        match new_state {
            JobState::Completed => {
                let result_present = update.result.is_some();
                let progress_ok = update.progress == Some(100);
                if !result_present || !progress_ok {
                    return Err(
                        "completed transition requires a result and progress=100".to_string()
                    );
                }
            }
            JobState::Failed | JobState::Cancelled => {
                if update.error.is_none() {
                    return Err(format!(
                        "{new_state:?} transition requires an error/reason"
                    ));
                }
            }
            JobState::Pending => {
                return Err("cannot transition back to pending".to_string());
            }
            JobState::Processing => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            owner: "user-1".to_string(),
            kind: JobKind::Image,
            params: JobParams {
                prompt: "a cat".to_string(),
                negative_prompt: None,
                model: None,
                quality: None,
                width: None,
                height: None,
                init_image_url: None,
                strength: None,
                caption_init_image: false,
                edit_type: None,
                generation_type: None,
                duration_seconds: None,
                fps: None,
                seed: None,
                training_steps: None,
                metadata: None,
            },
            cost: 1,
            state: JobState::Pending,
            progress: 0,
            attempts: 0,
            provider: None,
            result: None,
            error: None,
            moderation: ModerationStatus::Unknown,
            is_public: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn rejects_updates_to_terminal_jobs() {
        let mut job = base_job();
        job.state = JobState::Completed;
        let update = JobStatusUpdate::progress_to(50);
        assert!(validate_transition(&job, &update).is_err());
    }

    #[test]
    fn rejects_progress_going_backwards() {
        let mut job = base_job();
        job.progress = 60;
        let update = JobStatusUpdate::progress_to(40);
        assert!(validate_transition(&job, &update).is_err());
    }

    #[test]
    fn completed_requires_result_and_full_progress() {
        let job = base_job();
        let incomplete = JobStatusUpdate {
            state: Some(JobState::Completed),
            progress: Some(100),
            ..Default::default()
        };
        assert!(validate_transition(&job, &incomplete).is_err());

        let complete = JobStatusUpdate::to_completed(
            JobResult {
                media_url: "https://example.test/out.png".to_string(),
                latency_ms: Some(1200),
                caption: None,
            },
            "alpha".to_string(),
        );
        assert!(validate_transition(&job, &complete).is_ok());
    }

    #[test]
    fn failed_requires_an_error() {
        let job = base_job();
        let missing_error = JobStatusUpdate {
            state: Some(JobState::Failed),
            ..Default::default()
        };
        assert!(validate_transition(&job, &missing_error).is_err());

        let with_error = JobStatusUpdate::to_failed(JobError {
            code: "PROVIDER_FAILURE".to_string(),
            message: "timed out".to_string(),
        });
        assert!(validate_transition(&job, &with_error).is_ok());
    }

    #[test]
    fn cannot_transition_back_to_pending() {
        let mut job = base_job();
        job.state = JobState::Processing;
        let update = JobStatusUpdate {
            state: Some(JobState::Pending),
            ..Default::default()
        };
        assert!(validate_transition(&job, &update).is_err());
    }

    #[test]
    fn moderation_only_update_is_accepted_on_completed_jobs() {
        let mut job = base_job();
        job.state = JobState::Completed;
        let update = JobStatusUpdate {
            moderation: Some(ModerationStatus::Block),
            is_public: Some(false),
            ..Default::default()
        };
        assert!(validate_transition(&job, &update).is_ok());
    }
}
