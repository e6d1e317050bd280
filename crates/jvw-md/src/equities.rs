//! Monthly equity closes from the Yahoo chart API.
//!
//! One GET per ticker with `interval=1mo`. Each bar yields the adjusted
//! close (falling back to the raw close); bars with no price are emitted
//! with an empty `adj_close` so the normalizer drops and counts them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use crate::provider::{FetchError, RawPeriod, RawRecord, SeriesFetcher};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Clone)]
pub struct YahooChartFetcher {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl YahooChartFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::new_with_base_url(timeout, DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(timeout: Duration, base_url: String) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jvw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Config(format!("equity http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    fn chart_url(&self, ticker: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            ticker
        )
    }

    async fn fetch_ticker(
        &self,
        ticker: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let (period1, period2) = year_bounds(start_year, end_year)?;
        let p1 = period1.to_string();
        let p2 = period2.to_string();

        debug!(ticker, start_year, end_year, "equity chart request");

        let resp = self
            .http
            .get(self.chart_url(ticker))
            .query(&[
                ("period1", p1.as_str()),
                ("period2", p2.as_str()),
                ("interval", "1mo"),
                ("includeAdjustedClose", "true"),
                ("events", "div,splits"),
            ])
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
                body: format!("{ticker}: {}", body.chars().take(512).collect::<String>()),
            });
        }

        let parsed: ChartResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Decode(format!("{ticker} chart response: {e}")))?;

        if let Some(err) = parsed.chart.error {
            return Err(FetchError::Api {
                message: format!("{ticker}: {} {}", err.code, err.description),
                retryable: false,
            });
        }

        let result = parsed
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
            .ok_or_else(|| FetchError::Decode(format!("{ticker}: empty chart result")))?;

        bars_to_records(ticker, result)
    }
}

#[async_trait]
impl SeriesFetcher for YahooChartFetcher {
    fn name(&self) -> &'static str {
        "yahoo-chart"
    }

    async fn fetch(
        &self,
        series_ids: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut out = Vec::new();
        for ticker in series_ids {
            out.extend(self.fetch_ticker(ticker, start_year, end_year).await?);
        }
        Ok(out)
    }
}

/// `[Jan 1 start_year 00:00:00, Dec 31 end_year 23:59:59]` as UTC epoch seconds.
fn year_bounds(start_year: i32, end_year: i32) -> Result<(i64, i64), FetchError> {
    if start_year > end_year {
        return Err(FetchError::Config(format!(
            "start year {start_year} is after end year {end_year}"
        )));
    }
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| FetchError::Config(format!("bad start year {start_year}")))?;
    let end = NaiveDate::from_ymd_opt(end_year, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .ok_or_else(|| FetchError::Config(format!("bad end year {end_year}")))?;
    Ok((start.and_utc().timestamp(), end.and_utc().timestamp()))
}

fn bars_to_records(ticker: &str, result: ChartResult) -> Result<Vec<RawRecord>, FetchError> {
    let timestamps = result.timestamp.unwrap_or_default();
    let adj = result
        .indicators
        .adjclose
        .and_then(|mut v| v.pop())
        .map(|a| a.adjclose)
        .unwrap_or_default();
    let close = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let mut out = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(*ts, 0)
            .ok_or_else(|| FetchError::Decode(format!("{ticker}: bad timestamp {ts}")))?
            .date_naive();
        let price = adj
            .get(i)
            .copied()
            .flatten()
            .or_else(|| close.get(i).copied().flatten());
        out.push(
            RawRecord::new(
                Some(ticker.to_string()),
                RawPeriod::Date(date.format("%Y-%m-%d").to_string()),
            )
            .with_field("adj_close", price.map(|p| p.to_string()).unwrap_or_default()),
        );
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

// -----------------
// Tests (no network)
// -----------------
