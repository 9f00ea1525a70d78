//! Configuration module
//!
//! Settings for the sampler/gate pair and the demo server, read from the
//! environment (and an optional `.env` file).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::counters::PROC_STAT_PATH;
use crate::error::ShedError;

const SERVER_PORT: u16 = 4000;
const UTILIZATION_LIMIT: u32 = 90;
const REFRESH_INTERVAL_MS: u64 = 1000;
const METRICS_SERVICE: &str = "loadshed-api";
const METRICS_PREFIX: &str = "loadshed";

/// Console log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ShedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ShedError::InvalidConfig(format!(
                "LOG_FORMAT must be 'compact' or 'json', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadShedConfig {
    pub server_port: u16,
    pub environment: String,
    /// Requests are shed while utilization is at or above this percent.
    /// Values above 100 disable shedding.
    pub utilization_limit: u32,
    pub refresh_interval: Duration,
    pub cpu_stat_path: String,
    pub log_format: LogFormat,
    /// When true, `/health` is served without passing through the gate.
    pub health_bypasses_gate: bool,
    /// `service` label attached to every HTTP metric
    pub metrics_service: String,
    /// Namespace prepended to HTTP metric names
    pub metrics_prefix: String,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            environment: "development".to_string(),
            utilization_limit: UTILIZATION_LIMIT,
            refresh_interval: Duration::from_millis(REFRESH_INTERVAL_MS),
            cpu_stat_path: PROC_STAT_PATH.to_string(),
            log_format: LogFormat::Compact,
            health_bypasses_gate: true,
            metrics_service: METRICS_SERVICE.to_string(),
            metrics_prefix: METRICS_PREFIX.to_string(),
        }
    }
}

impl LoadShedConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to
    /// defaults, except the port which must be valid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_port = match lookup("PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            None => defaults.server_port,
        };

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or(defaults.environment);

        let utilization_limit = lookup("UTILIZATION_LIMIT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(UTILIZATION_LIMIT);

        let refresh_interval = Duration::from_millis(
            lookup("REFRESH_INTERVAL_MS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(REFRESH_INTERVAL_MS),
        );

        let log_format = match lookup("LOG_FORMAT") {
            Some(format) => format.parse()?,
            None => defaults.log_format,
        };

        let config = LoadShedConfig {
            server_port,
            environment,
            utilization_limit,
            refresh_interval,
            cpu_stat_path: lookup("CPU_STAT_PATH").unwrap_or(defaults.cpu_stat_path),
            log_format,
            health_bypasses_gate: lookup("SHED_HEALTH_ROUTES")
                .map(|s| s.trim().to_lowercase())
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            metrics_service: lookup("METRICS_SERVICE").unwrap_or(defaults.metrics_service),
            metrics_prefix: lookup("METRICS_PREFIX").unwrap_or(defaults.metrics_prefix),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShedError> {
        if self.refresh_interval.is_zero() {
            return Err(ShedError::InvalidConfig(
                "REFRESH_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        if self.cpu_stat_path.trim().is_empty() {
            return Err(ShedError::InvalidConfig(
                "CPU_STAT_PATH must not be empty".to_string(),
            ));
        }

        let prefix_is_valid = self
            .metrics_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !self.metrics_prefix.starts_with(|c: char| c.is_ascii_digit());
        if !prefix_is_valid {
            return Err(ShedError::InvalidConfig(format!(
                "METRICS_PREFIX must be a valid metric name prefix, got '{}'",
                self.metrics_prefix
            )));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }
}
