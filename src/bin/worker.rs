//! Standalone worker process. Runs one polling loop per job kind, sharing
//! the same service layer construction as the HTTP server binary via
//! `AppState::build`, but never mounts the router.

use std::time::Duration;

use genforge::configuration::get_configuration;
use genforge::database::get_connection_pool;
use genforge::domain::JobKind;
use genforge::server::AppState;
use genforge::shutdown::listen_for_shutdown;
use genforge::telemetry::init_tracing;
use genforge::worker::Worker;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("genforge=debug");

    let configuration = get_configuration().expect("Failed to read configuration");
    let pool = get_connection_pool(&configuration).await?;
    let state = AppState::build(pool, &configuration);

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(listen_for_shutdown(shutdown.clone()));

    let mut handles = Vec::new();
    for kind in [JobKind::Image, JobKind::Video, JobKind::Training] {
        let worker = Worker::new(
            kind,
            state.queue.clone(),
            state.job_store.clone(),
            state.ledger.clone(),
            state.orchestrator.clone(),
            state.moderation.clone(),
            state.notifications.clone(),
            Duration::from_millis(500),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    tracing::info!("worker pool started");
    for handle in handles {
        handle.await?;
    }

    signal_task.abort();
    Ok(())
}
