//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

/// Public Horizon endpoint used when `HORIZON_URL` is not provided.
pub const DEFAULT_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FAILURE_THRESHOLD: usize = 10;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 256;
pub const DEFAULT_STAGING_CAPACITY: usize = 10_000;
pub const DEFAULT_CACHE_CAPACITY: u64 = 200_000;
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

/// Monitor configuration derived from `.env`/process variables. Only the
/// database URL is mandatory; every detection knob has a default matching the
/// production cadence (10s cycles, 30min retention, threshold of 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    database_url: String,
    horizon_url: String,
    poll_interval: Duration,
    failure_threshold: usize,
    retention: Duration,
    drain_batch_size: usize,
    staging_capacity: usize,
    cache_capacity: u64,
    persist_attempts: u32,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let database_url = get_required_var("DATABASE_URL")?;
        let horizon_url =
            get_optional_var("HORIZON_URL").unwrap_or_else(|| DEFAULT_HORIZON_URL.to_string());
        let poll_interval = get_positive_number("MONITOR_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let failure_threshold = get_positive_number("MONITOR_FAILURE_THRESHOLD")?
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);
        let retention = get_positive_number("MONITOR_RETENTION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETENTION);
        let drain_batch_size =
            get_positive_number("MONITOR_DRAIN_BATCH_SIZE")?.unwrap_or(DEFAULT_DRAIN_BATCH_SIZE);
        let staging_capacity =
            get_positive_number("MONITOR_STAGING_CAPACITY")?.unwrap_or(DEFAULT_STAGING_CAPACITY);
        let cache_capacity =
            get_positive_number("MONITOR_CACHE_CAPACITY")?.unwrap_or(DEFAULT_CACHE_CAPACITY);
        let persist_attempts =
            get_positive_number("MONITOR_PERSIST_ATTEMPTS")?.unwrap_or(DEFAULT_PERSIST_ATTEMPTS);

        Ok(Self {
            database_url,
            horizon_url,
            poll_interval,
            failure_threshold,
            retention,
            drain_batch_size,
            staging_capacity,
            cache_capacity,
            persist_attempts,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn horizon_url(&self) -> &str {
        &self.horizon_url
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// TTL applied to staged transactions and processed markers.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn drain_batch_size(&self) -> usize {
        self.drain_batch_size
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging_capacity
    }

    pub fn cache_capacity(&self) -> u64 {
        self.cache_capacity
    }

    pub fn persist_attempts(&self) -> u32 {
        self.persist_attempts
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_positive_number<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError> + Default + PartialEq,
{
    let Some(raw) = get_optional_var(key) else {
        return Ok(None);
    };
    let value: T = raw
        .parse()
        .map_err(|source| ConfigError::InvalidNumber { key, source })?;
    if value == T::default() {
        return Err(ConfigError::ZeroValue { key });
    }
    Ok(Some(value))
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("FRAUD_WATCH_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{key}` must be greater than zero")]
    ZeroValue { key: &'static str },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const TUNABLES: [&str; 8] = [
        "HORIZON_URL",
        "MONITOR_POLL_INTERVAL_SECS",
        "MONITOR_FAILURE_THRESHOLD",
        "MONITOR_RETENTION_SECS",
        "MONITOR_DRAIN_BATCH_SIZE",
        "MONITOR_STAGING_CAPACITY",
        "MONITOR_CACHE_CAPACITY",
        "MONITOR_PERSIST_ATTEMPTS",
    ];

    fn set_env() {
        std::env::set_var("FRAUD_WATCH_SKIP_DOTENV", "1");
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        for key in TUNABLES {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();

        let config = MonitorConfig::load_from_env().expect("config loads");
        assert_eq!(config.database_url(), "sqlite://test.db");
        assert_eq!(config.horizon_url(), DEFAULT_HORIZON_URL);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.failure_threshold(), 10);
        assert_eq!(config.retention(), Duration::from_secs(1800));
        assert_eq!(config.persist_attempts(), DEFAULT_PERSIST_ATTEMPTS);
    }

    #[test]
    fn tunables_are_read_from_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("HORIZON_URL", " http://localhost:8000 ");
        std::env::set_var("MONITOR_POLL_INTERVAL_SECS", "3");
        std::env::set_var("MONITOR_FAILURE_THRESHOLD", "4");
        std::env::set_var("MONITOR_RETENTION_SECS", "60");
        std::env::set_var("MONITOR_DRAIN_BATCH_SIZE", "16");

        let config = MonitorConfig::load_from_env().expect("config loads");
        assert_eq!(config.horizon_url(), "http://localhost:8000");
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.failure_threshold(), 4);
        assert_eq!(config.retention(), Duration::from_secs(60));
        assert_eq!(config.drain_batch_size(), 16);

        set_env();
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "   ");

        let err = MonitorConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "DATABASE_URL"
            }
        ));

        set_env();
    }

    #[test]
    fn malformed_and_zero_numbers_are_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("MONITOR_FAILURE_THRESHOLD", "ten");
        let err = MonitorConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "MONITOR_FAILURE_THRESHOLD",
                ..
            }
        ));

        std::env::set_var("MONITOR_FAILURE_THRESHOLD", "0");
        let err = MonitorConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroValue {
                key: "MONITOR_FAILURE_THRESHOLD"
            }
        ));

        set_env();
    }
}
