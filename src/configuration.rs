use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Root application configuration, assembled from `configuration/base.yaml`,
/// an environment-specific overlay, and `APP_`-prefixed environment
/// variables (highest precedence).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub gpu: GpuSettings,
    pub rate_limits: RateLimitSettings,
    pub queues: QueueSettings,
    pub moderation: ModerationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
            .database(&self.database_name)
    }
}

/// Provider ordering, timeouts and circuit-breaker tuning for the GPU
/// orchestrator. Paired with `GPU_{NAME}_API_KEY` / `GPU_{NAME}_BASE_URL`
/// environment variables per provider.
#[derive(Debug, Deserialize, Clone)]
pub struct GpuSettings {
    pub primary: String,
    pub fallback: Vec<String>,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub caption_timeout_ms: u64,
    /// Poll interval for job-oriented providers (status=started, followed up
    /// against a provider-specific status endpoint).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overall deadline for a single job-oriented poll loop.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_timeout_ms() -> u64 {
    120_000
}

impl GpuSettings {
    /// Primary followed by fallback providers, de-duplicated, preserving order.
    pub fn provider_order(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut order = Vec::new();
        for name in std::iter::once(self.primary.clone()).chain(self.fallback.clone()) {
            if seen.insert(name.clone()) {
                order.push(name);
            }
        }
        order
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub fail_open: bool,
    /// How long a (user, action) pair stays blocked after exceeding its
    /// window limit, before it may be checked again.
    pub block_duration_ms: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    pub image_attempts: i32,
    pub video_attempts: i32,
    pub training_attempts: i32,
    pub image_backoff_base_secs: i64,
    pub video_backoff_base_secs: i64,
    pub training_backoff_secs: i64,
    pub visibility_timeout_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModerationSettings {
    pub adult_threshold: f64,
    pub violence_threshold: f64,
    pub hate_threshold: f64,
    pub harassment_threshold: f64,
    pub self_harm_threshold: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub low_confidence: f64,
    pub trust_review_floor: f64,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
}

fn default_classifier_timeout_ms() -> u64 {
    3000
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use `local` or `production`."
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(false))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
