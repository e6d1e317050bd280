//! Command handler modules for jvw.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod dashboard;
pub mod etl;

use anyhow::{Context, Result};
use chrono::Datelike;
use jvw_config::{AppConfig, DbConfig};
use jvw_db::{LoadOutcome, TableRun};
use jvw_md::RetryPolicy;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// One pool per process; callers close it before returning.
pub async fn connect_pool(cfg: &AppConfig) -> Result<PgPool> {
    let db = DbConfig::from_env().context("database configuration")?;
    jvw_db::connect(&db, cfg.db_timeout).await
}

pub fn retry_policy(cfg: &AppConfig) -> RetryPolicy {
    RetryPolicy::with_max_attempts(cfg.fetch_max_attempts)
}

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Print the per-table summary, then fail if any table failed. Every table
/// has already run by the time this is called.
pub fn finish_runs(runs: &[TableRun], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(runs).context("serialize run summary")?
        );
    } else {
        for r in runs {
            println!("{}", render_run(r));
        }
    }

    let failed: Vec<&str> = runs.iter().filter(|r| r.failed()).map(|r| r.table).collect();
    if !failed.is_empty() {
        anyhow::bail!("{} table(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

pub fn render_run(r: &TableRun) -> String {
    let range = match (r.first_month, r.last_month) {
        (Some(a), Some(b)) => format!("{a}..{b}"),
        _ => "-".to_string(),
    };
    let head = format!(
        "table={} records_in={} rows_out={} duplicates={} lookback={} dropped={} range={} gaps={}",
        r.table,
        r.records_in,
        r.rows_out,
        r.duplicates_collapsed,
        r.outside_window,
        r.dropped.values().sum::<usize>(),
        range,
        r.gaps
    );
    let tail = match &r.outcome {
        LoadOutcome::Loaded(o) => format!(
            "status=loaded inserted={} updated={} collapsed={}",
            o.inserted, o.updated, o.collapsed
        ),
        LoadOutcome::Staged { path } => format!("status=staged path={}", path.display()),
        LoadOutcome::Skipped { reason } => format!("status=skipped reason=\"{reason}\""),
        LoadOutcome::Failed {
            stage,
            error,
            retryable,
        } => format!("status=failed stage={stage:?} retryable={retryable} error=\"{error}\""),
    };
    format!("{head} {tail}")
}
