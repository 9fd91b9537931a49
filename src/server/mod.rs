pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admission::{AdmissionController, IdempotencyStore};
use crate::configuration::Settings;
use crate::job_store::JobStore;
use crate::ledger::{CreditLedger, PgCreditLedger};
use crate::moderation::{HttpModerationClassifier, ModerationEngine};
use crate::notification::{LoggingChannel, NotificationDispatcher, PreferenceStore};
use crate::orchestrator::{HttpProvider, Orchestrator};
use crate::queue::Queue;
use crate::rate_limit::RateLimiter;

/// Shared application state, threaded into every handler via `State`: a
/// single cloneable struct wrapping the pool plus service layer handles,
/// rather than per-handler globals.
#[derive(Clone)]
pub struct AppState {
    pub job_store: Arc<JobStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub queue: Arc<Queue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub admission: Arc<AdmissionController>,
    pub orchestrator: Arc<Orchestrator>,
    pub moderation: Arc<ModerationEngine>,
    pub notifications: Arc<NotificationDispatcher>,
    pub idempotency: Arc<IdempotencyStore>,
    pub pool: PgPool,
}

impl AppState {
    pub fn build(pool: PgPool, configuration: &Settings) -> Self {
        let job_store = Arc::new(JobStore::new(pool.clone()));
        let ledger: Arc<dyn CreditLedger> = Arc::new(PgCreditLedger::new(pool.clone()));
        let queue = Arc::new(Queue::new(pool.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            pool.clone(),
            Duration::from_secs(60),
            configuration.rate_limits.clone(),
        ));
        let admission = Arc::new(AdmissionController::new(
            job_store.clone(),
            ledger.clone(),
            queue.clone(),
            rate_limiter.clone(),
        ));

        let providers: Vec<Arc<dyn crate::orchestrator::Provider>> = configuration
            .gpu
            .provider_order()
            .into_iter()
            .map(|name| {
                let api_key = std::env::var(format!("GPU_{}_API_KEY", name.to_uppercase()))
                    .unwrap_or_default();
                let base_url = std::env::var(format!("GPU_{}_BASE_URL", name.to_uppercase()))
                    .unwrap_or_else(|_| format!("https://{name}.invalid"));
                Arc::new(HttpProvider::with_polling(
                    name,
                    base_url,
                    api_key,
                    configuration.gpu.timeout_ms,
                    configuration.gpu.poll_interval_ms,
                    configuration.gpu.poll_timeout_ms,
                )) as Arc<dyn crate::orchestrator::Provider>
            })
            .collect();
        let caption_provider = providers.first().map(|p| {
            Arc::new(HttpProvider::new(
                p.name().to_string(),
                std::env::var(format!("GPU_{}_BASE_URL", p.name().to_uppercase()))
                    .unwrap_or_else(|_| format!("https://{}.invalid", p.name())),
                std::env::var(format!("GPU_{}_API_KEY", p.name().to_uppercase())).unwrap_or_default(),
                configuration.gpu.caption_timeout_ms,
            )) as Arc<dyn crate::orchestrator::CaptionProvider>
        });

        let orchestrator = Arc::new(Orchestrator::new(providers, caption_provider, &configuration.gpu));

        let classifier_base_url = std::env::var("MODERATION_CLASSIFIER_BASE_URL")
            .unwrap_or_else(|_| "https://moderation-classifier.invalid".to_string());
        let classifier_api_key = std::env::var("MODERATION_CLASSIFIER_API_KEY").unwrap_or_default();
        let classifier = Arc::new(HttpModerationClassifier::new(
            classifier_base_url,
            classifier_api_key,
            configuration.moderation.classifier_timeout_ms,
        ));
        let moderation = Arc::new(ModerationEngine::new(
            pool.clone(),
            configuration.moderation.clone(),
            classifier,
        ));
        let notifications = Arc::new(NotificationDispatcher::new(
            Arc::new(LoggingChannel),
            Arc::new(PreferenceStore::new()),
        ));
        let idempotency = Arc::new(IdempotencyStore::new(pool.clone()));

        Self {
            job_store,
            ledger,
            queue,
            rate_limiter,
            admission,
            orchestrator,
            moderation,
            notifications,
            idempotency,
            pool,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/api/admin/health", get(handlers::health::admin_health))
        .route("/api/generate/image", post(handlers::generate::submit_image))
        .route("/api/generate/video", post(handlers::generate::submit_video))
        .route("/api/generate/history", get(handlers::generate::history))
        .route("/api/generate/:job_id", get(handlers::generate::get_job))
        .route(
            "/api/generate/:job_id/cancel",
            post(handlers::generate::cancel_job),
        )
        .route("/api/moderation/reports", post(handlers::moderation::submit_report))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
