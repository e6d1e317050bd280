//! BLS public API v2 fetcher (unemployment rate and CES employment).
//!
//! One POST per chunk of at most 50 series and 20 years (10 years without a
//! registration key). The API reports application errors inside a 200
//! response via `status`; those are classified here so rate/threshold
//! rejections are retried and everything else fails fast.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{FetchError, RawPeriod, RawRecord, SeriesFetcher};

pub const DEFAULT_BASE_URL: &str = "https://api.bls.gov";
const DATA_PATH: &str = "/publicAPI/v2/timeseries/data/";

pub const MAX_SERIES_PER_REQUEST: usize = 50;
pub const MAX_YEARS_WITH_KEY: i32 = 20;
pub const MAX_YEARS_WITHOUT_KEY: i32 = 10;

/// API key is supplied by the caller (config); never logged.
#[derive(Clone)]
pub struct BlsFetcher {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for BlsFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsFetcher")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BlsFetcher {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        Self::new_with_base_url(api_key, timeout, DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(
        api_key: Option<String>,
        timeout: Duration,
        base_url: String,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Config(format!("bls http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        })
    }

    fn data_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), DATA_PATH)
    }

    fn max_years(&self) -> i32 {
        if self.api_key.is_some() {
            MAX_YEARS_WITH_KEY
        } else {
            MAX_YEARS_WITHOUT_KEY
        }
    }

    async fn post_chunk(
        &self,
        series_ids: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let payload = BlsRequest {
            seriesid: series_ids,
            startyear: start_year.to_string(),
            endyear: end_year.to_string(),
            registrationkey: self.api_key.as_deref(),
        };

        debug!(
            series = series_ids.len(),
            start_year, end_year, "bls request"
        );

        let resp = self
            .http
            .post(self.data_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let parsed: BlsResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Decode(format!("bls response: {e}")))?;

        if parsed.status != "REQUEST_SUCCEEDED" {
            let message = if parsed.message.is_empty() {
                parsed.status.clone()
            } else {
                parsed.message.join("; ")
            };
            return Err(FetchError::Api {
                retryable: is_throttle_message(&message),
                message,
            });
        }

        let series = parsed.results.map(|r| r.series).unwrap_or_default();
        let mut out = Vec::new();
        for s in series {
            for item in s.data {
                out.push(
                    RawRecord::new(
                        Some(s.series_id.clone()),
                        RawPeriod::YearPeriod {
                            year: item.year,
                            period: item.period,
                        },
                    )
                    .with_field("value", item.value),
                );
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SeriesFetcher for BlsFetcher {
    fn name(&self) -> &'static str {
        "bls"
    }

    async fn fetch(
        &self,
        series_ids: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        if start_year > end_year {
            return Err(FetchError::Config(format!(
                "start year {start_year} is after end year {end_year}"
            )));
        }

        let mut out = Vec::new();
        for ids in series_ids.chunks(MAX_SERIES_PER_REQUEST) {
            for (from, to) in year_spans(start_year, end_year, self.max_years()) {
                out.extend(self.post_chunk(ids, from, to).await?);
            }
        }
        Ok(out)
    }
}

/// Split `[start, end]` into consecutive inclusive spans of at most `max` years.
pub fn year_spans(start: i32, end: i32, max: i32) -> Vec<(i32, i32)> {
    let max = max.max(1);
    let mut spans = Vec::new();
    let mut from = start;
    while from <= end {
        let to = from.saturating_add(max - 1).min(end);
        spans.push((from, to));
        match to.checked_add(1) {
            Some(next) => from = next,
            None => break,
        }
    }
    spans
}

/// BLS daily-threshold and rate-limit rejections clear up on their own.
fn is_throttle_message(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    ["threshold", "rate limit", "daily", "too many", "try again"]
        .iter()
        .any(|needle| m.contains(needle))
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BlsRequest<'a> {
    seriesid: &'a [String],
    startyear: String,
    endyear: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    registrationkey: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BlsResponse {
    status: String,
    #[serde(default)]
    message: Vec<String>,
    #[serde(rename = "Results", default)]
    results: Option<BlsResults>,
}

#[derive(Debug, Deserialize)]
struct BlsResults {
    #[serde(default)]
    series: Vec<BlsSeries>,
}

#[derive(Debug, Deserialize)]
struct BlsSeries {
    #[serde(rename = "seriesID")]
    series_id: String,
    #[serde(default)]
    data: Vec<BlsDataPoint>,
}

#[derive(Debug, Deserialize)]
struct BlsDataPoint {
    year: String,
    period: String,
    value: String,
}

// -----------------
// Tests (no network)
// -----------------
