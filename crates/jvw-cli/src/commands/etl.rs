//! `ingest`, `fetch` and `load`.

use std::path::Path;

use anyhow::{Context, Result};
use jvw_config::AppConfig;
use jvw_db::etl::{fetch_to_csv, ingest_target, load_from_csv};
use jvw_db::{MemoryStore, PgStore, TableRun, UpsertStore, YearRange};
use jvw_md::bls::BlsFetcher;
use jvw_md::equities::YahooChartFetcher;
use jvw_md::universe::Target;
use jvw_md::{RetryPolicy, SeriesFetcher};
use tracing::info;

use super::{connect_pool, current_year, retry_policy};

fn fetcher_for(cfg: &AppConfig, target: Target) -> Result<Box<dyn SeriesFetcher>> {
    let f: Box<dyn SeriesFetcher> = match target {
        Target::Unemployment | Target::Ces => Box::new(
            BlsFetcher::new_with_base_url(
                cfg.bls_api_key.clone(),
                cfg.http_timeout,
                cfg.bls_base_url.clone(),
            )
            .context("build BLS client")?,
        ),
        Target::Equities => Box::new(
            YahooChartFetcher::new_with_base_url(cfg.http_timeout, cfg.equity_base_url.clone())
                .context("build equity client")?,
        ),
    };
    Ok(f)
}

fn year_ranges(
    targets: &[Target],
    start: Option<i32>,
    end: Option<i32>,
) -> Result<Vec<(Target, YearRange)>> {
    let now = current_year();
    targets
        .iter()
        .map(|t| {
            YearRange::resolve(*t, start, end, now)
                .map(|r| (*t, r))
                .map_err(anyhow::Error::msg)
        })
        .collect()
}

pub async fn ingest(
    cfg: &AppConfig,
    targets: Vec<Target>,
    start: Option<i32>,
    end: Option<i32>,
    dry_run: bool,
) -> Result<Vec<TableRun>> {
    let plan = year_ranges(&targets, start, end)?;
    let fetchers = plan
        .iter()
        .map(|(t, _)| fetcher_for(cfg, *t))
        .collect::<Result<Vec<_>>>()?;
    let policy = retry_policy(cfg);

    if dry_run {
        info!("dry run: loading into an in-memory store");
        return Ok(ingest_all(&MemoryStore::new(), &plan, &fetchers, &policy).await);
    }
    let pool = connect_pool(cfg).await?;
    let store = PgStore::new(pool.clone(), cfg.db_timeout);
    let runs = ingest_all(&store, &plan, &fetchers, &policy).await;
    pool.close().await;
    Ok(runs)
}

async fn ingest_all(
    store: &dyn UpsertStore,
    plan: &[(Target, YearRange)],
    fetchers: &[Box<dyn SeriesFetcher>],
    policy: &RetryPolicy,
) -> Vec<TableRun> {
    let mut runs = Vec::with_capacity(plan.len());
    for ((target, years), fetcher) in plan.iter().zip(fetchers) {
        runs.push(ingest_target(fetcher.as_ref(), store, *target, *years, policy).await);
    }
    runs
}

pub async fn fetch(
    cfg: &AppConfig,
    targets: Vec<Target>,
    start: Option<i32>,
    end: Option<i32>,
    out: &Path,
) -> Result<Vec<TableRun>> {
    let plan = year_ranges(&targets, start, end)?;
    let policy = retry_policy(cfg);
    let mut runs = Vec::with_capacity(plan.len());
    for (target, years) in plan {
        let fetcher = fetcher_for(cfg, target)?;
        runs.push(fetch_to_csv(fetcher.as_ref(), target, years, &policy, out).await);
    }
    Ok(runs)
}

pub async fn load(cfg: &AppConfig, dir: &Path, dry_run: bool) -> Result<Vec<TableRun>> {
    if dry_run {
        info!(dir = %dir.display(), "dry run: loading staged files into an in-memory store");
        return Ok(load_all(&MemoryStore::new(), dir).await);
    }
    let pool = connect_pool(cfg).await?;
    let store = PgStore::new(pool.clone(), cfg.db_timeout);
    let runs = load_all(&store, dir).await;
    pool.close().await;
    Ok(runs)
}

async fn load_all(store: &dyn UpsertStore, dir: &Path) -> Vec<TableRun> {
    let mut runs = Vec::with_capacity(Target::ALL.len());
    for target in Target::ALL {
        runs.push(load_from_csv(store, target, dir).await);
    }
    runs
}
