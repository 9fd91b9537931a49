pub mod admission;
pub mod configuration;
pub mod database;
pub mod domain;
pub mod error;
pub mod job_store;
pub mod ledger;
pub mod moderation;
pub mod notification;
pub mod orchestrator;
pub mod queue;
pub mod rate_limit;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod worker;
