// Application configuration loaded from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::scheduling::deadline::DEFAULT_CALL_TIMEOUT;
use crate::scheduling::pricing::DEFAULT_CURRENCY;
use crate::scheduling::settings::DEFAULT_SETTINGS_TTL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Where durable scheduling state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// In-process store, for development only
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Unknown store backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    /// Required for the Postgres backend
    pub database_url: Option<String>,
    /// Unset keeps the cache in process
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub call_timeout: Duration,
    pub default_currency: String,
    pub multi_tenant: bool,
    pub settings_cache_ttl: Duration,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store_backend = parse_or(&var, "STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let call_timeout_ms: u64 =
            parse_or(&var, "STORE_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT.as_millis() as u64)?;
        if call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "STORE_CALL_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        let default_currency = var("DEFAULT_CURRENCY")
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if default_currency.len() != 3 {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_CURRENCY",
                value: default_currency,
            });
        }

        Ok(Self {
            store_backend,
            database_url,
            redis_url: var("REDIS_URL"),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "PORT", 8080)?,
            call_timeout: Duration::from_millis(call_timeout_ms),
            default_currency,
            multi_tenant: parse_or(&var, "MULTI_TENANT", true)?,
            settings_cache_ttl: Duration::from_secs(parse_or(
                &var,
                "SETTINGS_CACHE_TTL_SECS",
                DEFAULT_SETTINGS_TTL.as_secs(),
            )?),
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 5)?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
