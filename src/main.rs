use genforge::configuration::get_configuration;
use genforge::database::{get_connection_pool, migrate_database};
use genforge::server::{app, AppState};
use genforge::shutdown::listen_for_shutdown;
use genforge::telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("genforge=debug,tower_http=debug");

    let configuration = get_configuration().expect("Failed to read configuration");

    let pool = get_connection_pool(&configuration)
        .await
        .expect("Failed to create database pool");
    migrate_database(&pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::build(pool, &configuration);
    let router = app(state);

    let addr = std::net::SocketAddr::new(
        configuration.application.host.parse()?,
        configuration.application.port,
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("genforge listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(listen_for_shutdown(shutdown.clone()));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    signal_task.abort();
    Ok(())
}
