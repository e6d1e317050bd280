//! Load path: fetch -> prepare -> normalize -> (stage | upsert), one table
//! at a time.
//!
//! Tables are independent. A fetch, staging or upsert failure is recorded
//! on that table's [`TableRun`] and never stops the others; the caller
//! decides the exit status from [`TableRun::failed`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use jvw_md::normalizer::DroppedRecord;
use jvw_md::quality::build_quality_report;
use jvw_md::staging::{read_raw_csv, write_batch_csv, StagingError};
use jvw_md::universe::Target;
use jvw_md::{
    attach_monthly_returns, fetch_with_retry, normalize, CleanBatch, FetchError, Month, RawRecord,
    RetryPolicy, SeriesFetcher,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::upsert::{UpsertOutcome, UpsertStore};

// ---------------------------------------------------------------------------
// Year range
// ---------------------------------------------------------------------------

/// Earliest year accepted on the command line.
pub const MIN_YEAR: i32 = 1900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Missing bounds default to the target's start year and `current_year`.
    /// Both bounds must lie in `MIN_YEAR..=current_year + 1`.
    pub fn resolve(
        target: Target,
        start: Option<i32>,
        end: Option<i32>,
        current_year: i32,
    ) -> Result<Self, String> {
        let start = start.unwrap_or_else(|| target.default_start_year());
        let end = end.unwrap_or(current_year);
        let max = current_year.saturating_add(1);
        for (name, y) in [("start", start), ("end", end)] {
            if !(MIN_YEAR..=max).contains(&y) {
                return Err(format!("{name} year {y} outside {MIN_YEAR}..={max}"));
            }
        }
        if start > end {
            return Err(format!("start year {start} is after end year {end}"));
        }
        Ok(Self { start, end })
    }

    /// January 1st of the start year.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start, 1, 1).unwrap_or(NaiveDate::MIN)
    }
}

// ---------------------------------------------------------------------------
// Per-table result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Staging,
    Load,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded(UpsertOutcome),
    Staged { path: PathBuf },
    /// Nothing to write: empty batch or missing staging file.
    Skipped { reason: String },
    Failed {
        stage: Stage,
        error: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRun {
    pub table: &'static str,
    pub records_in: usize,
    pub rows_out: usize,
    pub duplicates_collapsed: usize,
    /// Lookback rows fetched as a return base and not loaded.
    pub outside_window: usize,
    /// Dropped records by parse error kind.
    pub dropped: BTreeMap<&'static str, usize>,
    pub first_month: Option<Month>,
    pub last_month: Option<Month>,
    pub gaps: usize,
    pub outcome: LoadOutcome,
}

impl TableRun {
    fn from_batch(batch: &CleanBatch, outcome: LoadOutcome) -> Self {
        let q = build_quality_report(batch);
        Self {
            table: batch.schema.name,
            records_in: batch.report.records_in,
            rows_out: batch.len(),
            duplicates_collapsed: batch.report.duplicates_collapsed,
            outside_window: batch.report.outside_window,
            dropped: batch.report.drop_counts(),
            first_month: q.first_month(),
            last_month: q.last_month(),
            gaps: q.gaps.len(),
            outcome,
        }
    }

    fn without_batch(target: Target, outcome: LoadOutcome) -> Self {
        Self {
            table: target.schema().name,
            records_in: 0,
            rows_out: 0,
            duplicates_collapsed: 0,
            outside_window: 0,
            dropped: BTreeMap::new(),
            first_month: None,
            last_month: None,
            gaps: 0,
            outcome,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Map provider fields to columns, normalize, and derive equity returns.
pub fn clean_records(target: Target, records: Vec<RawRecord>) -> CleanBatch {
    clean(target, records, Vec::new(), None)
}

/// `rejected` are records that never reached the normalizer; they are
/// counted as drops. Rows before `keep_from` only serve as the base for
/// derived returns and are removed afterwards.
fn clean(
    target: Target,
    mut records: Vec<RawRecord>,
    rejected: Vec<DroppedRecord>,
    keep_from: Option<NaiveDate>,
) -> CleanBatch {
    target.prepare(&mut records);
    let mut batch = normalize(&records, target.schema());
    batch.report.absorb(rejected);
    if target == Target::Equities {
        let filled = attach_monthly_returns(&mut batch);
        debug!(table = batch.schema.name, filled, "monthly returns derived");
    }
    if let Some(first) = keep_from {
        let removed = batch.retain_from(first);
        debug!(table = batch.schema.name, removed, %first, "lookback rows trimmed");
    }

    let report = &batch.report;
    if report.dropped_count() > 0 {
        warn!(
            table = batch.schema.name,
            dropped = report.dropped_count(),
            kinds = ?report.drop_counts(),
            "records dropped during normalization"
        );
    }
    let quality = build_quality_report(&batch);
    if !quality.is_clean() {
        warn!(table = batch.schema.name, gaps = quality.gaps.len(), "month gaps in batch");
    }
    debug!(table = batch.schema.name, "{quality}");
    info!(
        table = batch.schema.name,
        records_in = report.records_in,
        rows_out = batch.len(),
        duplicates = report.duplicates_collapsed,
        "normalized"
    );
    batch
}

pub async fn fetch_batch(
    fetcher: &dyn SeriesFetcher,
    target: Target,
    years: YearRange,
    policy: &RetryPolicy,
) -> Result<CleanBatch, FetchError> {
    let ids = target.series_ids();
    let lookback = target.lookback_years();
    info!(
        provider = fetcher.name(),
        table = target.schema().name,
        series = ids.len(),
        start_year = years.start,
        end_year = years.end,
        lookback,
        "fetching"
    );
    let records =
        fetch_with_retry(fetcher, &ids, years.start - lookback, years.end, policy).await?;
    let keep_from = (lookback > 0).then(|| years.first_day());
    Ok(clean(target, records, Vec::new(), keep_from))
}

/// Upsert `batch` on its table's primary key. Empty batches are skipped.
pub async fn load_batch(store: &dyn UpsertStore, batch: &CleanBatch) -> LoadOutcome {
    let table = batch.schema.name;
    if batch.is_empty() {
        warn!(table, "no rows after cleaning; skipping load");
        return LoadOutcome::Skipped {
            reason: "empty batch".to_string(),
        };
    }
    match store.upsert(table, batch, batch.schema.primary_key).await {
        Ok(out) => LoadOutcome::Loaded(out),
        Err(e) => {
            warn!(table, error = %e, retryable = e.is_retryable(), "load failed");
            LoadOutcome::Failed {
                stage: Stage::Load,
                error: e.to_string(),
                retryable: e.is_retryable(),
            }
        }
    }
}

fn fetch_failed(target: Target, e: &FetchError) -> TableRun {
    warn!(table = target.schema().name, error = %e, retryable = e.is_retryable(), "fetch failed");
    TableRun::without_batch(
        target,
        LoadOutcome::Failed {
            stage: Stage::Fetch,
            error: e.to_string(),
            retryable: e.is_retryable(),
        },
    )
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Fetch, normalize and upsert one table.
pub async fn ingest_target(
    fetcher: &dyn SeriesFetcher,
    store: &dyn UpsertStore,
    target: Target,
    years: YearRange,
    policy: &RetryPolicy,
) -> TableRun {
    let batch = match fetch_batch(fetcher, target, years, policy).await {
        Ok(b) => b,
        Err(e) => return fetch_failed(target, &e),
    };
    let outcome = load_batch(store, &batch).await;
    TableRun::from_batch(&batch, outcome)
}

/// Fetch, normalize and write `out_dir/<target csv>`.
pub async fn fetch_to_csv(
    fetcher: &dyn SeriesFetcher,
    target: Target,
    years: YearRange,
    policy: &RetryPolicy,
    out_dir: &Path,
) -> TableRun {
    let batch = match fetch_batch(fetcher, target, years, policy).await {
        Ok(b) => b,
        Err(e) => return fetch_failed(target, &e),
    };
    let path = out_dir.join(target.csv_name());
    let outcome = match write_batch_csv(&path, &batch) {
        Ok(()) => {
            info!(table = batch.schema.name, path = %path.display(), rows = batch.len(), "staged");
            LoadOutcome::Staged { path }
        }
        Err(e) => {
            warn!(table = batch.schema.name, error = %e, "staging write failed");
            LoadOutcome::Failed {
                stage: Stage::Staging,
                error: e.to_string(),
                retryable: false,
            }
        }
    };
    TableRun::from_batch(&batch, outcome)
}

/// Read `dir/<target csv>`, normalize and upsert. A missing file is a skip.
pub async fn load_from_csv(store: &dyn UpsertStore, target: Target, dir: &Path) -> TableRun {
    let path = dir.join(target.csv_name());
    let staged = match read_raw_csv(&path, target.schema()) {
        Ok(r) => r,
        Err(StagingError::NotFound(p)) => {
            warn!(table = target.schema().name, path = %p.display(), "staging file not found; skipping");
            return TableRun::without_batch(
                target,
                LoadOutcome::Skipped {
                    reason: format!("{} not found", p.display()),
                },
            );
        }
        Err(e) => {
            warn!(table = target.schema().name, error = %e, "staging read failed");
            return TableRun::without_batch(
                target,
                LoadOutcome::Failed {
                    stage: Stage::Staging,
                    error: e.to_string(),
                    retryable: false,
                },
            );
        }
    };
    let batch = clean(target, staged.records, staged.malformed, None);
    let outcome = load_batch(store, &batch).await;
    TableRun::from_batch(&batch, outcome)
}
