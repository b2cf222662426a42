//! Application configuration loaded from environment variables.

use foodbridge_core::oracle::VerificationPolicy;

use crate::errors::{DispatcherError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. `sqlite:./foodbridge.db`)
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Simulator tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Base URL of the verification / geocoding / routing oracle.
    /// `None` leaves every oracle unavailable.
    pub oracle_url: Option<String>,
    /// Bearer token sent to the oracle
    pub oracle_api_key: Option<String>,
    /// Per-request timeout for oracle calls
    pub oracle_timeout_secs: u64,
    /// What a failed image verification means
    pub verification_policy: VerificationPolicy,
    /// How many times a conflicting posting write is retried
    pub update_retry_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./foodbridge.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| DispatcherError::Config("Invalid API_PORT".to_string()))?,
            tick_interval_ms: env_var("TICK_INTERVAL_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| DispatcherError::Config("Invalid TICK_INTERVAL_MS".to_string()))?,
            oracle_url: env_var("ORACLE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            oracle_api_key: env_var("ORACLE_API_KEY").ok().filter(|k| !k.is_empty()),
            oracle_timeout_secs: env_var("ORACLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| DispatcherError::Config("Invalid ORACLE_TIMEOUT_SECS".to_string()))?,
            verification_policy: match env_var("VERIFICATION_POLICY") {
                Ok(raw) => VerificationPolicy::parse(&raw).ok_or_else(|| {
                    DispatcherError::Config(format!(
                        "Invalid VERIFICATION_POLICY {raw:?} (expected open or closed)"
                    ))
                })?,
                Err(_) => VerificationPolicy::default(),
            },
            update_retry_limit: env_var("UPDATE_RETRY_LIMIT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| DispatcherError::Config("Invalid UPDATE_RETRY_LIMIT".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| DispatcherError::Config(format!("Missing env var: {key}")))
}
