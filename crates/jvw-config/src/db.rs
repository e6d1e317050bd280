//! Postgres target resolution.
//!
//! `DATABASE_URL` wins when set. Otherwise `PGHOST`, `PGPORT`, `PGDATABASE`,
//! `PGUSER` and `PGPASSWORD` are all required, and every missing one is
//! reported at once. TLS defaults to `require` (`PGSSLMODE` overrides; an
//! `sslmode=` already in the URL is left alone).
//!
//! **The password and URL are redacted in `Debug` output.**

use std::fmt;
use std::str::FromStr;

use crate::{non_blank, ConfigError};

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_PGSSLMODE: &str = "PGSSLMODE";

/// Required when `DATABASE_URL` is absent, in reporting order.
pub const REQUIRED_PG_VARS: [&str; 5] = ["PGHOST", "PGPORT", "PGDATABASE", "PGUSER", "PGPASSWORD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(format!("unknown sslmode '{other}'")),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum DbTarget {
    Url(String),
    Params {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
    },
}

impl fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // URLs carry the password inline.
            DbTarget::Url(_) => f.debug_tuple("Url").field(&"<REDACTED>").finish(),
            DbTarget::Params {
                host,
                port,
                database,
                user,
                ..
            } => f
                .debug_struct("Params")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .field("password", &"<REDACTED>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub target: DbTarget,
    pub ssl_mode: SslMode,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        crate::load_dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ssl_mode = match non_blank(&lookup, ENV_PGSSLMODE) {
            None => SslMode::default(),
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: ENV_PGSSLMODE,
                reason,
            })?,
        };

        if let Some(url) = non_blank(&lookup, ENV_DATABASE_URL) {
            return Ok(Self {
                target: DbTarget::Url(url),
                ssl_mode,
            });
        }

        let missing: Vec<&'static str> = REQUIRED_PG_VARS
            .iter()
            .copied()
            .filter(|v| non_blank(&lookup, v).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let get = |name: &str| non_blank(&lookup, name).unwrap_or_default();
        let port_raw = get("PGPORT");
        let port: u16 = port_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "PGPORT",
            reason: format!("'{port_raw}' is not a port number"),
        })?;

        Ok(Self {
            target: DbTarget::Params {
                host: get("PGHOST"),
                port,
                database: get("PGDATABASE"),
                user: get("PGUSER"),
                password: get("PGPASSWORD"),
            },
            ssl_mode,
        })
    }

    /// The URL already pins `sslmode`; `ssl_mode` must not override it.
    pub fn url_sets_sslmode(&self) -> bool {
        matches!(&self.target, DbTarget::Url(u) if u.contains("sslmode="))
    }

    /// Log-safe description of the target (no credentials).
    pub fn describe(&self) -> String {
        match &self.target {
            DbTarget::Url(_) => format!("DATABASE_URL (sslmode={})", self.ssl_mode),
            DbTarget::Params {
                host,
                port,
                database,
                ..
            } => format!("{host}:{port}/{database} (sslmode={})", self.ssl_mode),
        }
    }
}
