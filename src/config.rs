use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const ENV_PREFIX: &str = "SETTLEMENT";

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Unset selects the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub shutdown_grace_secs: u64,
    pub resolver_timeout_secs: u64,
    pub pending_batch_size: usize,
    pub gasbank: GasBankSettings,
    pub oracle: OracleSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GasBankSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub confirmation_timeout_secs: u64,
    /// When set, withdrawals are resolved over HTTP instead of by timeout
    pub resolver_endpoint: Option<String>,
    pub resolver_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub resolver_endpoint: Option<String>,
    pub resolver_token: Option<String>,
}

impl AppConfig {
    /// Load from `SETTLEMENT_*` environment variables, nested keys split on `__`
    /// (e.g. `SETTLEMENT_GASBANK__POLL_INTERVAL_SECS`).
    pub fn from_env() -> AppResult<Self> {
        Self::load(Self::environment())
    }

    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn load(env: Environment) -> AppResult<Self> {
        let config: AppConfig = Config::builder()
            .set_default("database_max_connections", 5_i64)?
            .set_default("shutdown_grace_secs", 10_i64)?
            .set_default("resolver_timeout_secs", 5_i64)?
            .set_default("pending_batch_size", 500_i64)?
            .set_default("gasbank.enabled", true)?
            .set_default("gasbank.poll_interval_secs", 15_i64)?
            .set_default("gasbank.confirmation_timeout_secs", 120_i64)?
            .set_default("oracle.enabled", true)?
            .set_default("oracle.poll_interval_secs", 10_i64)?
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.gasbank.poll_interval_secs == 0 || self.oracle.poll_interval_secs == 0 {
            return Err(AppError::Config("poll interval must be positive".to_string()));
        }
        if self.pending_batch_size == 0 {
            return Err(AppError::Config("pending_batch_size must be positive".to_string()));
        }
        if self.database_max_connections == 0 {
            return Err(AppError::Config(
                "database_max_connections must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_url(&self) -> Option<&str> {
        non_blank(&self.database_url)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }
}

impl GasBankSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn resolver_endpoint(&self) -> Option<&str> {
        non_blank(&self.resolver_endpoint)
    }
}

impl OracleSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resolver_endpoint(&self) -> Option<&str> {
        non_blank(&self.resolver_endpoint)
    }
}
