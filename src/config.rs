use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from `config/default.toml` (or a single
/// TOML file), overlaid with environment-specific files and `GOPHERMART_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub accrual: AccrualConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP API bind port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Accrual provider endpoint and the core's queue/worker tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualConfig {
    /// Base URL of the external accrual provider, e.g. `http://localhost:8090`.
    pub address: String,

    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default = "default_new_queue_capacity")]
    pub new_queue_capacity: usize,
    #[serde(default = "default_in_progress_queue_capacity")]
    pub in_progress_queue_capacity: usize,
    #[serde(default = "default_dead_letter_queue_capacity")]
    pub dead_letter_queue_capacity: usize,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_max_event_failures")]
    pub max_event_failures: u32,

    #[serde(default = "default_job_delay_new_ms")]
    pub job_delay_new_ms: u64,
    #[serde(default = "default_job_delay_in_progress_ms")]
    pub job_delay_in_progress_ms: u64,
    #[serde(default = "default_job_delay_dead_letter_ms")]
    pub job_delay_dead_letter_ms: u64,

    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,

    /// Run the startup reconciliation sweep before serving HTTP traffic.
    #[serde(default = "default_true")]
    pub reconcile_on_startup: bool,
}

fn default_http_timeout_ms() -> u64 {
    1_000
}
fn default_new_queue_capacity() -> usize {
    1_000
}
fn default_in_progress_queue_capacity() -> usize {
    1_000
}
fn default_dead_letter_queue_capacity() -> usize {
    1_000_000
}
fn default_worker_concurrency() -> usize {
    2
}
fn default_max_event_failures() -> u32 {
    5
}
fn default_job_delay_new_ms() -> u64 {
    100
}
fn default_job_delay_in_progress_ms() -> u64 {
    1_000
}
fn default_job_delay_dead_letter_ms() -> u64 {
    1_000
}
fn default_drain_deadline_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_api_port() -> u16 {
    8080
}

impl AccrualConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn job_delay_new(&self) -> Duration {
        Duration::from_millis(self.job_delay_new_ms)
    }

    pub fn job_delay_in_progress(&self) -> Duration {
        Duration::from_millis(self.job_delay_in_progress_ms)
    }

    pub fn job_delay_dead_letter(&self) -> Duration {
        Duration::from_millis(self.job_delay_dead_letter_ms)
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify JWTs.
    pub jwt_secret: String,
    #[serde(default = "default_jwt_ttl_secs")]
    pub jwt_ttl_secs: u64,
}

fn default_jwt_ttl_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Loads configuration from `config/` relative to the current directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Loads configuration from either a config directory or a single TOML file.
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", default_max_connections() as i64)?
            .set_default("api_port", default_api_port() as i64)?
            .set_default("accrual.http_timeout_ms", default_http_timeout_ms() as i64)?
            .set_default(
                "accrual.new_queue_capacity",
                default_new_queue_capacity() as i64,
            )?
            .set_default(
                "accrual.in_progress_queue_capacity",
                default_in_progress_queue_capacity() as i64,
            )?
            .set_default(
                "accrual.dead_letter_queue_capacity",
                default_dead_letter_queue_capacity() as i64,
            )?
            .set_default(
                "accrual.worker_concurrency",
                default_worker_concurrency() as i64,
            )?
            .set_default(
                "accrual.max_event_failures",
                default_max_event_failures() as i64,
            )?
            .set_default("accrual.job_delay_new_ms", default_job_delay_new_ms() as i64)?
            .set_default(
                "accrual.job_delay_in_progress_ms",
                default_job_delay_in_progress_ms() as i64,
            )?
            .set_default(
                "accrual.job_delay_dead_letter_ms",
                default_job_delay_dead_letter_ms() as i64,
            )?
            .set_default(
                "accrual.drain_deadline_secs",
                default_drain_deadline_secs() as i64,
            )?
            .set_default("accrual.reconcile_on_startup", true)?
            .set_default("auth.jwt_ttl_secs", default_jwt_ttl_secs() as i64)?;

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("GOPHERMART_ENV").unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            Environment::with_prefix("GOPHERMART")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrual_config_converts_millis_to_duration() {
        let cfg = AccrualConfig {
            address: "http://localhost:8090".into(),
            http_timeout_ms: 1000,
            new_queue_capacity: 10,
            in_progress_queue_capacity: 10,
            dead_letter_queue_capacity: 10,
            worker_concurrency: 2,
            max_event_failures: 5,
            job_delay_new_ms: 100,
            job_delay_in_progress_ms: 1000,
            job_delay_dead_letter_ms: 1000,
            drain_deadline_secs: 30,
            reconcile_on_startup: true,
        };
        assert_eq!(cfg.http_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.job_delay_new(), Duration::from_millis(100));
    }
}
