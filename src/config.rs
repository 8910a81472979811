//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::utils::HttpRetryPolicy;
use crate::services::settlement::SettlementConfig;
use crate::workers::reconciliation::ReconciliationConfig;
use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Absent when running with `SKIP_EXTERNALS=true`
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub settlement: SettlementConfig,
    pub reconciliation: ReconciliationConfig,
    pub psp_http: HttpRetryPolicy,
    /// Serve from the in-memory store, no Postgres
    pub skip_externals: bool,
    pub run_migrations: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS", false);
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            settlement: SettlementConfig::from_env(),
            reconciliation: ReconciliationConfig::from_env(),
            psp_http: HttpRetryPolicy::from_env(),
            skip_externals,
            run_migrations: env_flag("RUN_MIGRATIONS", false),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;

        if self.settlement.poll_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_POLL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.settlement.max_distribution_attempts < 1 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_MAX_DISTRIBUTION_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.reconciliation.batch_size < 1 {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.reconciliation.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_INTERVAL_SECONDS cannot be 0".to_string(),
            ));
        }

        // The lease has to outlive the slowest delivery call, or the sweep
        // re-claims a transaction whose delivery is still in flight.
        let slowest_call = self.psp_http.worst_case();
        if self.settlement.distribution_lease <= slowest_call {
            return Err(ConfigError::ValidationFailed(format!(
                "SETTLEMENT_DISTRIBUTION_LEASE_SECONDS ({}s) must exceed the longest PSP call ({}s)",
                self.settlement.distribution_lease.as_secs(),
                slowest_call.as_secs()
            )));
        }

        if self.run_migrations && self.database.is_none() {
            return Err(ConfigError::ValidationFailed(
                "RUN_MIGRATIONS requires a database; unset SKIP_EXTERNALS".to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::InvalidValue(
                "DATABASE_URL must start with postgres:// or postgresql://".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string())
                .to_lowercase(),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                "plain" | "" => LogFormat::Plain,
                _ => return Err(ConfigError::InvalidValue("LOG_FORMAT".to_string())),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn in_memory_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            database: None,
            logging: LoggingConfig::default(),
            settlement: SettlementConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            psp_http: HttpRetryPolicy::default(),
            skip_externals: true,
            run_migrations: false,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_pool_bounds() {
        let config = DatabaseConfig {
            url: "postgres://localhost/healthy_pay".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };
        assert!(config.validate().is_err());

        let config = DatabaseConfig {
            url: "mysql://localhost/healthy_pay".to_string(),
            min_connections: 1,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_config_is_valid() {
        assert!(in_memory_config().validate().is_ok());
    }

    #[test]
    fn test_zero_poll_attempts_rejected() {
        let mut config = in_memory_config();
        config.settlement.poll_max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = in_memory_config();
        config.reconciliation.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_must_outlive_the_slowest_psp_call() {
        let mut config = in_memory_config();
        config.settlement.distribution_lease = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));

        // 30s timeout, 3 attempts, 1s + 2s backoff
        config.settlement.distribution_lease = Duration::from_secs(93);
        assert!(config.validate().is_err());
        config.settlement.distribution_lease = Duration::from_secs(94);
        assert!(config.validate().is_ok());

        config.psp_http.max_retries = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_migrations_need_a_database() {
        let mut config = in_memory_config();
        config.run_migrations = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_log_level_validation() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_err());
    }
}
