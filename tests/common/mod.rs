use genforge::configuration::{get_configuration, DatabaseSettings};
use genforge::database::migrate_database;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Spins up a pool against a freshly named database and runs migrations:
/// each test gets its own schema so concurrent `cargo test` runs never
/// interfere.
pub async fn spawn_test_pool() -> PgPool {
    let mut configuration = get_configuration().expect("failed to read configuration");
    configuration.database.database_name = format!("test_{}", Uuid::new_v4().simple());

    let maintenance_pool = connect_maintenance(&configuration.database).await;
    sqlx::query(&format!(
        r#"CREATE DATABASE "{}""#,
        configuration.database.database_name
    ))
    .execute(&maintenance_pool)
    .await
    .expect("failed to create test database");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(configuration.database.connect_options())
        .await
        .expect("failed to connect to test database");

    migrate_database(&pool).await.expect("failed to run migrations");
    pool
}

async fn connect_maintenance(settings: &DatabaseSettings) -> PgPool {
    let mut maintenance = settings.clone();
    maintenance.database_name = "postgres".to_string();
    PgPoolOptions::new()
        .max_connections(2)
        .connect_with(maintenance.connect_options())
        .await
        .expect("failed to connect to maintenance database")
}
