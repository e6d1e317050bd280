//! Runtime configuration for the jvw pipeline.
//!
//! Everything is resolved from the process environment once at startup and
//! passed into constructors; nothing else in the workspace reads env vars.
//!
//! - [`AppConfig`]: provider endpoints, API key, timeouts, retry and cache knobs.
//! - [`db::DbConfig`]: Postgres target, from `DATABASE_URL` or the discrete
//!   `PG*` variables.
//!
//! Both have a `from_lookup` constructor taking a name -> value function so
//! tests never mutate the process environment.

pub mod db;

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub use db::{DbConfig, DbTarget, SslMode};

pub const ENV_BLS_API_KEY: &str = "BLS_API_KEY";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "JVW_HTTP_TIMEOUT_SECS";
pub const ENV_DB_TIMEOUT_SECS: &str = "JVW_DB_TIMEOUT_SECS";
pub const ENV_FETCH_MAX_ATTEMPTS: &str = "JVW_FETCH_MAX_ATTEMPTS";
pub const ENV_CACHE_TTL_SECS: &str = "JVW_CACHE_TTL_SECS";
pub const ENV_BLS_BASE_URL: &str = "JVW_BLS_BASE_URL";
pub const ENV_EQUITY_BASE_URL: &str = "JVW_EQUITY_BASE_URL";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;

pub const DEFAULT_BLS_BASE_URL: &str = "https://api.bls.gov";
pub const DEFAULT_EQUITY_BASE_URL: &str = "https://query1.finance.yahoo.com";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors name the variable, never a secret value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing DB env vars: {} (set DATABASE_URL or all of PGHOST, PGPORT, PGDATABASE, PGUSER, PGPASSWORD)", .0.join(", "))]
    MissingVars(Vec<&'static str>),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

/// Load `.env.local` then `.env` from the working directory if present.
///
/// Silent when the files do not exist; production injects env vars directly.
/// Existing process variables are never overridden.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
}

/// Non-blank value of `name`, trimmed.
pub(crate) fn non_blank<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_blank(lookup, name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            var: name,
            reason: format!("'{raw}': {e}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Everything except the database target.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bls_api_key: Option<String>,
    pub bls_base_url: String,
    pub equity_base_url: String,
    pub http_timeout: Duration,
    pub db_timeout: Duration,
    pub fetch_max_attempts: u32,
    /// Zero disables the alignment cache.
    pub cache_ttl: Duration,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bls_api_key", &self.bls_api_key.as_ref().map(|_| "<REDACTED>"))
            .field("bls_base_url", &self.bls_base_url)
            .field("equity_base_url", &self.equity_base_url)
            .field("http_timeout", &self.http_timeout)
            .field("db_timeout", &self.db_timeout)
            .field("fetch_max_attempts", &self.fetch_max_attempts)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bls_api_key: None,
            bls_base_url: DEFAULT_BLS_BASE_URL.to_string(),
            equity_base_url: DEFAULT_EQUITY_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            db_timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl AppConfig {
    /// Load dotenv files, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_secs: u64 = parse_or(&lookup, ENV_HTTP_TIMEOUT_SECS, DEFAULT_HTTP_TIMEOUT_SECS)?;
        let db_secs: u64 = parse_or(&lookup, ENV_DB_TIMEOUT_SECS, DEFAULT_DB_TIMEOUT_SECS)?;
        let attempts: u32 = parse_or(&lookup, ENV_FETCH_MAX_ATTEMPTS, DEFAULT_FETCH_MAX_ATTEMPTS)?;
        let ttl_secs: u64 = parse_or(&lookup, ENV_CACHE_TTL_SECS, DEFAULT_CACHE_TTL_SECS)?;

        if http_secs == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_HTTP_TIMEOUT_SECS,
                reason: "must be > 0".to_string(),
            });
        }
        if db_secs == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_DB_TIMEOUT_SECS,
                reason: "must be > 0".to_string(),
            });
        }
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                var: ENV_FETCH_MAX_ATTEMPTS,
                reason: "must be >= 1".to_string(),
            });
        }

        Ok(Self {
            bls_api_key: non_blank(&lookup, ENV_BLS_API_KEY),
            bls_base_url: non_blank(&lookup, ENV_BLS_BASE_URL)
                .unwrap_or_else(|| DEFAULT_BLS_BASE_URL.to_string()),
            equity_base_url: non_blank(&lookup, ENV_EQUITY_BASE_URL)
                .unwrap_or_else(|| DEFAULT_EQUITY_BASE_URL.to_string()),
            http_timeout: Duration::from_secs(http_secs),
            db_timeout: Duration::from_secs(db_secs),
            fetch_max_attempts: attempts,
            cache_ttl: Duration::from_secs(ttl_secs),
        })
    }

    pub fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }
}
