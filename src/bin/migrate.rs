//! Standalone migration runner, separate from the server binary so deploys
//! can run migrations as a one-shot job ahead of rolling out new server
//! instances.

use genforge::configuration::get_configuration;
use genforge::database::{get_connection_pool, migrate_database};
use genforge::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("genforge=info");

    let configuration = get_configuration().expect("Failed to read configuration");
    let pool = get_connection_pool(&configuration).await?;
    migrate_database(&pool).await?;

    tracing::info!("migrations applied");
    Ok(())
}
