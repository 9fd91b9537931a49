//! Scores generated media against configured thresholds, decides an
//! enforcement action, and handles user-submitted reports against public
//! jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::configuration::ModerationSettings;
use crate::domain::ModerationStatus;

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("classifier request failed: {0}")]
    Classifier(#[from] reqwest::Error),
    #[error("classifier response could not be parsed: {0}")]
    ClassifierDecode(String),
}

/// Scores a piece of generated media against the moderation categories.
/// The classifier itself (the model that produces these scores) is an
/// external collaborator; this trait is the seam between it and the policy
/// decision made in `classify_scores`.
#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    async fn score(&self, media_url: &str) -> Result<ModerationScores, ModerationError>;
}

/// A reqwest-backed classifier client, following the same shape as the GPU
/// orchestrator's `CaptionProvider`.
pub struct HttpModerationClassifier {
    base_url: String,
    api_key: secrecy::Secret<String>,
    client: reqwest::Client,
}

impl HttpModerationClassifier {
    pub fn new(base_url: impl Into<String>, api_key: String, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            api_key: secrecy::Secret::new(api_key),
            client,
        }
    }
}

#[async_trait]
impl ModerationClassifier for HttpModerationClassifier {
    async fn score(&self, media_url: &str) -> Result<ModerationScores, ModerationError> {
        use secrecy::ExposeSecret;

        let response = self
            .client
            .post(format!("{}/v1/classify", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&serde_json::json!({ "media_url": media_url }))
            .send()
            .await?
            .error_for_status()?;

        response
            .json::<ModerationScores>()
            .await
            .map_err(|e| ModerationError::ClassifierDecode(e.to_string()))
    }
}

/// Raw category confidences returned by a scoring backend, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModerationScores {
    pub adult: f64,
    pub violence: f64,
    pub hate: f64,
    pub harassment: f64,
    pub self_harm: f64,
}

impl ModerationScores {
    fn overall_confidence(&self) -> f64 {
        [
            self.adult,
            self.violence,
            self.hate,
            self.harassment,
            self.self_harm,
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }

    fn any_category_over_threshold(&self, settings: &ModerationSettings) -> bool {
        self.adult >= settings.adult_threshold
            || self.violence >= settings.violence_threshold
            || self.hate >= settings.hate_threshold
            || self.harassment >= settings.harassment_threshold
            || self.self_harm >= settings.self_harm_threshold
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportSubmission {
    pub similar_reports: u32,
    pub reporter_account_age_days: i64,
}

/// Whether a job with this enforcement outcome may be shown publicly.
pub fn is_public(status: ModerationStatus) -> bool {
    matches!(status, ModerationStatus::Approve | ModerationStatus::Flag)
}

/// Owner trust as a scalar in [0, 1], derived from account age in bands.
pub fn owner_trust(account_age_days: i64) -> f64 {
    if account_age_days < 1 {
        0.2
    } else if account_age_days < 7 {
        0.4
    } else if account_age_days < 30 {
        0.6
    } else {
        0.8
    }
}

/// Applied in order:
/// - any category score over its threshold: block
/// - overall confidence >= high: block
/// - overall confidence >= medium: review
/// - overall confidence >= low: review if owner trust is below the review
///   floor, otherwise flag
/// - otherwise: approve
fn classify_scores(
    settings: &ModerationSettings,
    scores: ModerationScores,
    owner_account_age_days: i64,
) -> ModerationStatus {
    if scores.any_category_over_threshold(settings) {
        return ModerationStatus::Block;
    }

    let confidence = scores.overall_confidence();

    if confidence >= settings.high_confidence {
        ModerationStatus::Block
    } else if confidence >= settings.medium_confidence {
        ModerationStatus::Review
    } else if confidence >= settings.low_confidence {
        if owner_trust(owner_account_age_days) < settings.trust_review_floor {
            ModerationStatus::Review
        } else {
            ModerationStatus::Flag
        }
    } else {
        ModerationStatus::Approve
    }
}

pub struct ModerationEngine {
    pool: PgPool,
    settings: ModerationSettings,
    classifier: Arc<dyn ModerationClassifier>,
}

impl ModerationEngine {
    pub fn new(pool: PgPool, settings: ModerationSettings, classifier: Arc<dyn ModerationClassifier>) -> Self {
        Self {
            pool,
            settings,
            classifier,
        }
    }

    pub fn classify(&self, scores: ModerationScores, owner_account_age_days: i64) -> ModerationStatus {
        classify_scores(&self.settings, scores, owner_account_age_days)
    }

    /// Scores `media_url` through the classifier and applies policy. Whether
    /// a job's output ends up public follows directly from the resulting
    /// status: approved and flagged media stay public, reviewed and blocked
    /// media do not.
    pub async fn evaluate(
        &self,
        media_url: &str,
        owner_account_age_days: i64,
    ) -> Result<ModerationStatus, ModerationError> {
        let scores = self.classifier.score(media_url).await?;
        Ok(self.classify(scores, owner_account_age_days))
    }

    /// Records the report, and returns whether it should trigger immediate
    /// re-review rather than waiting for a human queue: true once enough
    /// independent, sufficiently-trusted reports accumulate.
    pub async fn submit_report(
        &self,
        job_id: Uuid,
        reporter: &str,
        reason: &str,
        submission: ReportSubmission,
    ) -> Result<bool, ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_reports (id, job_id, reporter, reason, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(reporter)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        let reporter_trust = owner_trust(submission.reporter_account_age_days);
        let immediate_action = submission.similar_reports >= 3
            || (submission.similar_reports >= 1 && reporter_trust >= self.settings.trust_review_floor.max(0.6));

        if immediate_action {
            tracing::warn!(%job_id, reporter, "report triggered immediate re-review");
        }

        Ok(immediate_action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModerationReport {
    pub id: Uuid,
    pub job_id: Uuid,
    pub reporter: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ModerationSettings {
        ModerationSettings {
            adult_threshold: 0.7,
            violence_threshold: 0.6,
            hate_threshold: 0.8,
            harassment_threshold: 0.7,
            self_harm_threshold: 0.9,
            high_confidence: 0.8,
            medium_confidence: 0.6,
            low_confidence: 0.4,
            trust_review_floor: 0.3,
            classifier_timeout_ms: 3000,
        }
    }

    #[test]
    fn owner_trust_bands_match_account_age() {
        assert_eq!(owner_trust(0), 0.2);
        assert_eq!(owner_trust(3), 0.4);
        assert_eq!(owner_trust(20), 0.6);
        assert_eq!(owner_trust(90), 0.8);
    }

    #[test]
    fn blocks_when_any_category_at_or_over_threshold() {
        let scores = ModerationScores {
            hate: 0.8,
            ..Default::default()
        };
        assert_eq!(
            classify_scores(&settings(), scores, 400),
            ModerationStatus::Block
        );
    }

    #[test]
    fn high_overall_confidence_blocks_even_under_category_thresholds() {
        // self_harm_threshold is 0.9, so 0.85 clears no category threshold,
        // but it is still >= high_confidence (0.8) overall.
        let scores = ModerationScores {
            self_harm: 0.85,
            ..Default::default()
        };
        assert_eq!(classify_scores(&settings(), scores, 400), ModerationStatus::Block);
    }

    #[test]
    fn medium_confidence_always_reviews_regardless_of_trust() {
        let scores = ModerationScores {
            adult: 0.65,
            ..Default::default()
        };
        assert_eq!(classify_scores(&settings(), scores, 400), ModerationStatus::Review);
        assert_eq!(classify_scores(&settings(), scores, 0), ModerationStatus::Review);
    }

    #[test]
    fn low_confidence_trusted_owner_is_flagged_not_reviewed() {
        let scores = ModerationScores {
            adult: 0.45,
            ..Default::default()
        };
        // trust at >=30 days is 0.8, above the 0.3 review floor -> flag
        assert_eq!(classify_scores(&settings(), scores, 400), ModerationStatus::Flag);
        // trust at <1 day is 0.2, below the 0.3 review floor -> review
        assert_eq!(classify_scores(&settings(), scores, 0), ModerationStatus::Review);
    }

    #[test]
    fn low_scores_approve() {
        let scores = ModerationScores::default();
        assert_eq!(classify_scores(&settings(), scores, 400), ModerationStatus::Approve);
    }

    #[test]
    fn only_approve_and_flag_are_public() {
        assert!(is_public(ModerationStatus::Approve));
        assert!(is_public(ModerationStatus::Flag));
        assert!(!is_public(ModerationStatus::Review));
        assert!(!is_public(ModerationStatus::Block));
        assert!(!is_public(ModerationStatus::Unknown));
    }
}
