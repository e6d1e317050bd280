//! Provider boundary for monthly series ingestion.
//!
//! This module defines the raw record type, the fetcher trait, the fetch
//! error taxonomy and the retry loop. Concrete providers live in
//! [`crate::bls`] and [`crate::equities`]; nothing here parses values or
//! touches the database.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Raw record
// ---------------------------------------------------------------------------

/// The period of a raw observation, as the provider expressed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPeriod {
    /// BLS style: year plus a period indicator (`M01`..`M12`, or `1`..`12`).
    YearPeriod { year: String, period: String },
    /// A date or timestamp string; truncated to its month by the normalizer.
    Date(String),
}

/// One observation exactly as returned upstream. Values stay strings so the
/// normalizer owns all parsing and null handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Series id / ticker. `None` for single-series tables.
    pub entity_key: Option<String>,
    pub period: RawPeriod,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(entity_key: Option<String>, period: RawPeriod) -> Self {
        Self {
            entity_key,
            period,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Move a field to a new name (provider field -> table column).
    pub fn rename_field(&mut self, from: &str, to: &str) {
        if let Some(v) = self.fields.remove(from) {
            self.fields.insert(to.to_string(), v);
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure before a response arrived (DNS, connect, reset).
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    /// Provider answered but reported an application-level failure.
    #[error("provider rejected request: {message}")]
    Api { message: String, retryable: bool },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("config error: {0}")]
    Config(String),
}

impl FetchError {
    /// Transport failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout(_) => true,
            FetchError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            FetchError::Api { retryable, .. } => *retryable,
            FetchError::Decode(_) | FetchError::Config(_) => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(timeout)
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher trait
// ---------------------------------------------------------------------------

/// Upstream series provider.
///
/// Object-safe so callers can hold `Box<dyn SeriesFetcher>`; `Send + Sync`
/// so it can be shared across tasks.
#[async_trait]
pub trait SeriesFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch every observation for `series_ids` in `[start_year, end_year]`.
    ///
    /// Order is whatever the upstream returns; the normalizer sorts and
    /// deduplicates.
    async fn fetch(
        &self,
        series_ids: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Call `fetcher` until it succeeds, fails terminally, or attempts run out.
pub async fn fetch_with_retry(
    fetcher: &dyn SeriesFetcher,
    series_ids: &[String],
    start_year: i32,
    end_year: i32,
    policy: &RetryPolicy,
) -> Result<Vec<RawRecord>, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(series_ids, start_year, end_year).await {
            Ok(records) => {
                debug!(
                    provider = fetcher.name(),
                    attempt,
                    records = records.len(),
                    "fetch ok"
                );
                return Ok(records);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    provider = fetcher.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable fetch error; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
