//! Dashboard report: the jobs-vs-equities KPIs, correlation snapshot and
//! the two indexed chart frames, computed from the store for one window.

use jvw_md::schema::{EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT, SECTOR_EMPLOYMENT};
use jvw_md::universe::{ces_sector_for_etf, is_index_ticker, DEFAULT_ETF, INDEX_TICKER, SECTOR_ETFS};
use jvw_md::{Month, Window};
use serde::Serialize;
use tracing::{info, warn};

use crate::align::{inner_join, outer_join, MonthlySeries, OuterFrame, Reducer, SeriesSpec};
use crate::engine::{AlignError, AlignmentEngine, SeriesSource};
use crate::stats::{correlation, last_value, mom_yoy, momentum, pct_change, rebase, LevelChange, Stat};

pub const MOMENTUM_HORIZONS: [usize; 3] = [1, 3, 12];

const UNEMPLOYMENT: &str = "unemployment_rate";
const INDEX_CLOSE: &str = "index_close";
const INDEX_RETURN: &str = "index_return";
const ETF_CLOSE: &str = "etf_close";
const ETF_RETURN: &str = "etf_return";
const SECTOR_JOBS: &str = "sector_jobs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardRequest {
    pub start: Option<Month>,
    pub end: Option<Month>,
    pub etf: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Momentum {
    pub m1: Stat,
    pub m3: Stat,
    pub m12: Stat,
}

impl Momentum {
    fn of(returns: &MonthlySeries) -> Self {
        let v = returns.values();
        Self {
            m1: momentum(&v, MOMENTUM_HORIZONS[0]),
            m3: momentum(&v, MOMENTUM_HORIZONS[1]),
            m12: momentum(&v, MOMENTUM_HORIZONS[2]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationSnapshot {
    pub index_vs_unemployment: Stat,
    pub etf_vs_unemployment: Stat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub window: Window,
    /// Intersection of the three tables' ranges.
    pub data_window: Window,
    pub index_ticker: String,
    pub etf: String,
    pub available_etfs: Vec<String>,
    pub sector: String,
    pub unemployment: Option<LevelChange>,
    pub index_momentum: Momentum,
    pub etf_momentum: Momentum,
    /// ETF monthly return vs sector employment growth.
    pub etf_vs_sector_jobs: Stat,
    pub correlations: CorrelationSnapshot,
    /// Index rebased to 100 next to the unemployment rate.
    pub market_chart: OuterFrame,
    /// ETF rebased to 100 next to sector employment.
    pub sector_chart: OuterFrame,
    /// Labels of series with no rows in the window.
    pub empty_series: Vec<String>,
}

/// Build the report. Missing tickers or non-overlapping data are
/// configuration errors; sparse series yield `InsufficientData` stats.
pub async fn build_dashboard<S: SeriesSource>(
    engine: &AlignmentEngine<S>,
    req: &DashboardRequest,
) -> Result<DashboardReport, AlignError> {
    // --- tickers ---
    let tickers = engine.source().distinct_entities(&EQUITY_MONTHLY).await?;
    if tickers.is_empty() {
        return Err(AlignError::Config("no tickers in equity_monthly".to_string()));
    }
    let index_ticker = tickers
        .iter()
        .find(|t| t.as_str() == INDEX_TICKER)
        .or_else(|| tickers.iter().find(|t| is_index_ticker(t)))
        .cloned()
        .ok_or_else(|| AlignError::Config("broad index (^GSPC) not found in equity_monthly".to_string()))?;
    let available_etfs: Vec<String> = SECTOR_ETFS
        .iter()
        .filter(|e| tickers.iter().any(|t| t == *e))
        .map(|e| e.to_string())
        .collect();
    let etf = match &req.etf {
        Some(want) => {
            let want = want.trim().to_ascii_uppercase();
            if !available_etfs.contains(&want) {
                return Err(AlignError::Config(format!(
                    "ETF '{want}' not available (have: {})",
                    available_etfs.join(", ")
                )));
            }
            want
        }
        None => available_etfs
            .iter()
            .find(|e| e.as_str() == DEFAULT_ETF)
            .or_else(|| available_etfs.first())
            .cloned()
            .ok_or_else(|| AlignError::Config("no sector ETFs in equity_monthly".to_string()))?,
    };
    let sector = ces_sector_for_etf(&etf)
        .ok_or_else(|| AlignError::Config(format!("no CES sector mapped for {etf}")))?
        .to_string();

    // --- window ---
    let data_window = engine
        .default_window(&[
            HEADLINE_UNEMPLOYMENT.name,
            SECTOR_EMPLOYMENT.name,
            EQUITY_MONTHLY.name,
        ])
        .await?
        .ok_or_else(|| AlignError::Config("tables have no overlapping months".to_string()))?;
    let requested = Window::new(
        req.start.unwrap_or(data_window.start()),
        req.end.unwrap_or(data_window.end()),
    )
    .map_err(|e| AlignError::Config(e.to_string()))?;
    let window = requested.clamp_to(&data_window).ok_or_else(|| {
        AlignError::Config(format!(
            "requested window {requested} is outside available data {data_window}"
        ))
    })?;

    info!(window = %window, index = %index_ticker, etf = %etf, sector = %sector, "building dashboard");

    // --- series ---
    let specs = vec![
        SeriesSpec::new(UNEMPLOYMENT, HEADLINE_UNEMPLOYMENT.name, "unemployment_rate", Reducer::Mean),
        SeriesSpec::new(INDEX_CLOSE, EQUITY_MONTHLY.name, "adj_close", Reducer::Max)
            .with_filter("ticker", &index_ticker),
        SeriesSpec::new(INDEX_RETURN, EQUITY_MONTHLY.name, "monthly_return", Reducer::Mean)
            .with_filter("ticker", &index_ticker),
        SeriesSpec::new(ETF_CLOSE, EQUITY_MONTHLY.name, "adj_close", Reducer::Max)
            .with_filter("ticker", &etf),
        SeriesSpec::new(ETF_RETURN, EQUITY_MONTHLY.name, "monthly_return", Reducer::Mean)
            .with_filter("ticker", &etf),
        SeriesSpec::new(SECTOR_JOBS, SECTOR_EMPLOYMENT.name, "employment_thousands", Reducer::Mean)
            .with_filter("sector_name", &sector),
    ];
    let loaded = engine.load(window, &specs, true).await?;
    let get = |label: &str| {
        loaded
            .iter()
            .find(|s| s.label() == label)
            .cloned()
            .unwrap_or_else(|| MonthlySeries::empty(label))
    };
    let unemployment = get(UNEMPLOYMENT);
    let index_close = get(INDEX_CLOSE);
    let index_return = get(INDEX_RETURN);
    let etf_close = get(ETF_CLOSE);
    let etf_return = get(ETF_RETURN);
    let sector_jobs = get(SECTOR_JOBS);

    let empty_series: Vec<String> = loaded
        .iter()
        .filter(|s| s.is_empty())
        .map(|s| s.label().to_string())
        .collect();
    for label in &empty_series {
        warn!(label = %label, window = %window, "dashboard series is empty");
    }

    // --- KPIs ---
    let unemployment_kpi = last_value(&unemployment).and_then(|(m, _)| mom_yoy(&unemployment, m));
    let jobs_growth = pct_change(&sector_jobs);

    // Both snapshot correlations cover the same months: those where the
    // index, the ETF and unemployment all have a value. An empty member
    // leaves no common months.
    let joint = inner_join(
        window,
        &[index_return.clone(), etf_return.clone(), unemployment.clone()],
    );
    let joint_series = |label: &str| {
        joint
            .empty
            .is_empty()
            .then(|| joint.series(label))
            .flatten()
            .unwrap_or_else(|| MonthlySeries::empty(label))
    };
    let joint_unemployment = joint_series(UNEMPLOYMENT);
    let correlations = CorrelationSnapshot {
        index_vs_unemployment: correlation(&joint_series(INDEX_RETURN), &joint_unemployment),
        etf_vs_unemployment: correlation(&joint_series(ETF_RETURN), &joint_unemployment),
    };

    // --- charts ---
    let index_indexed = MonthlySeries::new(
        format!("{index_ticker} (=100)"),
        rebase(&index_close, 100.0).points().clone(),
    );
    let etf_indexed = MonthlySeries::new(
        format!("{etf} (=100)"),
        rebase(&etf_close, 100.0).points().clone(),
    );
    let market_chart = outer_join(window, &[index_indexed, unemployment.clone()]);
    let sector_chart = outer_join(window, &[etf_indexed, sector_jobs.clone()]);

    Ok(DashboardReport {
        window,
        data_window,
        index_ticker,
        etf,
        available_etfs,
        sector,
        unemployment: unemployment_kpi,
        index_momentum: Momentum::of(&index_return),
        etf_momentum: Momentum::of(&etf_return),
        etf_vs_sector_jobs: correlation(&etf_return, &jobs_growth),
        correlations,
        market_chart,
        sector_chart,
        empty_series,
    })
}
