//! Daemon configuration
//!
//! Built once at startup from the process environment and handed to each
//! component constructor. Components never read the environment themselves.
//!
//! ```rust,ignore
//! let settings = Settings::from_env()?;
//! let extractor = PostgresExtractor::new(&settings.postgres);
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::backoff::BackoffPolicy;

/// Configuration error type
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Parse {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{var}={value} is out of range: {hint}")]
    Range {
        var: &'static str,
        value: String,
        hint: &'static str,
    },

    #[error("{0}")]
    Custom(String),
}

/// PostgreSQL source connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresSettings {
    pub db_name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// Search index settings
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticSettings {
    pub index: String,
    pub address: String,
    pub schema_path: PathBuf,
    pub request_timeout: Duration,
}

/// Sync loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct EtlSettings {
    pub batch_size: usize,
    pub storage_path: PathBuf,
    pub idle_interval: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub elastic: ElasticSettings,
    pub etl: EtlSettings,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let postgres = PostgresSettings {
            db_name: env.string("DB_NAME", "movies_database"),
            user: env.string("DB_USER", "app"),
            password: env.string("DB_PASSWORD", "123qwe"),
            host: env.string("DB_HOST", "0.0.0.0"),
            port: env.parse("DB_PORT", 5432u16, "port number")?,
        };

        let address = env.string("ADDRESS", "http://0.0.0.0:9200");
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(ConfigError::Range {
                var: "ADDRESS",
                value: address,
                hint: "must be an http(s) URL",
            });
        }
        let index = env.string("INDEX", "movies");
        if index.trim().is_empty() {
            return Err(ConfigError::Custom("INDEX must not be empty".into()));
        }
        let timeout_secs: f64 = env.parse("HTTP_TIMEOUT_SECS", 30.0, "number of seconds")?;
        let elastic = ElasticSettings {
            index,
            address: address.trim_end_matches('/').to_string(),
            schema_path: PathBuf::from(env.string("SCHEMA_PATH", "movies_index_schema.json")),
            request_timeout: positive_secs("HTTP_TIMEOUT_SECS", timeout_secs)?,
        };

        let batch_size: usize = env.parse("BATCH_SIZE", 100usize, "positive integer")?;
        if batch_size == 0 {
            return Err(ConfigError::Range {
                var: "BATCH_SIZE",
                value: "0".into(),
                hint: "must be at least 1",
            });
        }
        let idle_secs: f64 = env.parse("IDLE_INTERVAL_SECS", 60.0, "number of seconds")?;

        let start: f64 = env.parse("BACKOFF_START_SECS", 0.1, "number of seconds")?;
        let factor: f64 = env.parse("BACKOFF_FACTOR", 2.0, "number")?;
        let border: f64 = env.parse("BACKOFF_BORDER_SECS", 30.0, "number of seconds")?;
        if !(factor >= 1.0 && factor.is_finite()) {
            return Err(ConfigError::Range {
                var: "BACKOFF_FACTOR",
                value: factor.to_string(),
                hint: "must be a finite number >= 1",
            });
        }
        let start = positive_secs("BACKOFF_START_SECS", start)?;
        let border = positive_secs("BACKOFF_BORDER_SECS", border)?;
        if border < start {
            return Err(ConfigError::Custom(format!(
                "BACKOFF_BORDER_SECS ({:?}) is below BACKOFF_START_SECS ({:?})",
                border, start
            )));
        }

        let etl = EtlSettings {
            batch_size,
            storage_path: PathBuf::from(env.string("STORAGE_PATH", "storage.json")),
            idle_interval: positive_secs("IDLE_INTERVAL_SECS", idle_secs)?,
            backoff: BackoffPolicy::new(start, factor, border),
        };

        let log_format = match env.string("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Parse {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    expected: "`pretty` or `json`",
                })
            }
        };

        Ok(Self {
            postgres,
            elastic,
            etl,
            log_format,
        })
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str, default: &str) -> String {
        (self.0)(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match (self.0)(var) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse {
                var,
                value: raw,
                expected,
            }),
        }
    }
}

fn positive_secs(var: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(ConfigError::Range {
            var,
            value: secs.to_string(),
            hint: "must be a positive number of seconds",
        })
    }
}
