//! Process configuration for the atlas gateway.
//!
//! Everything is resolved from the environment exactly once, at startup.
//! Nothing here is re-read at use time; the resulting [`Config`] is immutable
//! and shared read-only.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Environment variable holding the per-source rate-limit delay, in seconds.
pub const ENV_RATE_LIMIT_DELAY: &str = "API_RATE_LIMIT_DELAY";
/// Environment variable holding the model identifier.
pub const ENV_MODEL: &str = "OPENAI_MODEL";
/// Environment variable holding the API key for the model provider.
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable overriding the provider base URL.
pub const ENV_API_BASE: &str = "OPENAI_API_BASE";
/// Environment variable overriding the trip dataset path.
pub const ENV_TRIP_DATA_FILE: &str = "TRIP_DATA_FILE";

/// Errors in configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_rate_limit_delay() -> f64 {
    1.0
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_trip_data_file() -> PathBuf {
    PathBuf::from("data/trip_history.json")
}

/// Immutable process configuration, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum spacing between requests to any single source, in seconds.
    pub rate_limit_delay: f64,
    /// Model identifier handed to the chat provider.
    pub model: String,
    /// API key for the chat provider. May be empty; the provider reports
    /// itself unconfigured in that case.
    pub api_key: String,
    /// Optional override for the provider base URL.
    pub api_base: Option<String>,
    /// Path to the trip history dataset.
    pub trip_data_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit_delay: default_rate_limit_delay(),
            model: default_model(),
            api_key: String::new(),
            api_base: None,
            trip_data_file: default_trip_data_file(),
        }
    }
}

impl Config {
    /// Resolve configuration from the environment, applying defaults for
    /// anything unset. Call once at process start.
    pub fn from_env() -> Result<Self> {
        let rate_limit_delay = match read_var(ENV_RATE_LIMIT_DELAY)? {
            Some(raw) => parse_delay(&raw)?,
            None => default_rate_limit_delay(),
        };

        let model = read_var(ENV_MODEL)?.unwrap_or_else(default_model);
        let api_key = read_var(ENV_API_KEY)?.unwrap_or_default();
        let api_base = read_var(ENV_API_BASE)?;
        let trip_data_file = read_var(ENV_TRIP_DATA_FILE)?
            .map(PathBuf::from)
            .unwrap_or_else(default_trip_data_file);

        let config = Self {
            rate_limit_delay,
            model,
            api_key,
            api_base,
            trip_data_file,
        };
        debug!(
            delay = config.rate_limit_delay,
            model = %config.model,
            data = %config.trip_data_file.display(),
            "configuration resolved"
        );
        Ok(config)
    }

    /// The rate-limit delay as a [`Duration`].
    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_delay)
    }
}

fn read_var(var: &'static str) -> Result<Option<String>> {
    match std::env::var(var) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(var)),
    }
}

fn parse_delay(raw: &str) -> Result<f64> {
    let parsed: f64 = raw.parse().map_err(|_| ConfigError::Invalid {
        var: ENV_RATE_LIMIT_DELAY,
        value: raw.to_string(),
        reason: "expected a number of seconds".to_string(),
    })?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(ConfigError::Invalid {
            var: ENV_RATE_LIMIT_DELAY,
            value: raw.to_string(),
            reason: "delay must be a finite, non-negative number".to_string(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit_delay, 1.0);
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.api_key.is_empty());
        assert!(config.api_base.is_none());
        assert_eq!(config.trip_data_file, PathBuf::from("data/trip_history.json"));
    }

    #[test]
    fn parse_delay_accepts_floats() {
        assert_eq!(parse_delay("0.5").unwrap(), 0.5);
        assert_eq!(parse_delay("2").unwrap(), 2.0);
        assert_eq!(parse_delay("0").unwrap(), 0.0);
    }

    #[test]
    fn parse_delay_rejects_garbage() {
        assert!(parse_delay("fast").is_err());
        assert!(parse_delay("-1").is_err());
        assert!(parse_delay("inf").is_err());
    }

    #[test]
    fn rate_limit_duration() {
        let config = Config {
            rate_limit_delay: 0.25,
            ..Config::default()
        };
        assert_eq!(config.rate_limit(), Duration::from_millis(250));
    }
}
