//! Configuration module for dues-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DuesConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub database: Option<DatabaseConfig>,
    pub references: ReferenceConfig,
}

/// Where the engine keeps its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "DUES_STORAGE must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Zero disables expiry.
    pub ttl_hours: u64,
    pub sweep_interval_secs: u64,
    pub max_issue_attempts: u32,
}

impl ReferenceConfig {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        match self.ttl_hours {
            0 => None,
            hours => i64::try_from(hours).ok().map(chrono::Duration::hours),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 72,
            sweep_interval_secs: 60,
            max_issue_attempts: 5,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl DuesConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage: StorageBackend = env::var("DUES_STORAGE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            }),
            StorageBackend::Memory => None,
        };

        let defaults = ReferenceConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "dues-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            storage,
            database,
            references: ReferenceConfig {
                ttl_hours: env_or("REFERENCE_TTL_HOURS", defaults.ttl_hours),
                sweep_interval_secs: env_or(
                    "REFERENCE_SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval_secs,
                ),
                max_issue_attempts: env_or(
                    "REFERENCE_MAX_ISSUE_ATTEMPTS",
                    defaults.max_issue_attempts,
                ),
            },
        })
    }

    /// In-memory configuration on an ephemeral port, for tests and demos.
    pub fn in_memory() -> Self {
        Self {
            common: core_config::Config {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            service_name: "dues-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            database: None,
            references: ReferenceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!("Postgres".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let config = ReferenceConfig {
            ttl_hours: 0,
            ..ReferenceConfig::default()
        };
        assert!(config.ttl().is_none());
        assert_eq!(
            ReferenceConfig::default().ttl(),
            Some(chrono::Duration::hours(72))
        );
    }
}
