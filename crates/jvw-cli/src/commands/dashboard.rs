//! `dashboard`: build the report from Postgres and print it.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use jvw_analytics::dashboard::Momentum;
use jvw_analytics::{
    build_dashboard, AlignmentEngine, DashboardReport, DashboardRequest, OuterFrame, Stat,
};
use jvw_config::AppConfig;
use jvw_db::PgStore;

use super::connect_pool;

pub async fn run(cfg: &AppConfig, req: &DashboardRequest, json: bool) -> Result<()> {
    let pool = connect_pool(cfg).await?;
    let engine = AlignmentEngine::new(PgStore::new(pool.clone(), cfg.db_timeout), cfg.cache_ttl);
    let res = build_dashboard(&engine, req).await;
    pool.close().await;
    let report = res.context("build dashboard")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize dashboard")?
        );
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn stat(s: &Stat, pct: bool) -> String {
    match s {
        Stat::Value(v) if pct => format!("{:+.2}%", v * 100.0),
        Stat::Value(v) => format!("{v:+.3}"),
        Stat::InsufficientData { needed, available } => {
            format!("n/a (needs {needed}, have {available})")
        }
    }
}

fn delta(d: Option<f64>) -> String {
    d.map(|v| format!("{v:+.2} pp")).unwrap_or_else(|| "n/a".to_string())
}

fn momentum_line(label: &str, m: &Momentum) -> String {
    format!(
        "{label}: 1m {}  3m {}  12m {}",
        stat(&m.m1, true),
        stat(&m.m3, true),
        stat(&m.m12, true)
    )
}

fn frame(out: &mut String, title: &str, f: &OuterFrame) {
    let _ = writeln!(out, "\n{title}");
    let _ = writeln!(out, "month    {}", f.labels.join("  "));
    for row in &f.rows {
        let cells: Vec<String> = row
            .values
            .iter()
            .map(|v| v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "-".to_string()))
            .collect();
        let _ = writeln!(out, "{}  {}", row.month, cells.join("  "));
    }
}

pub fn render(r: &DashboardReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Jobs vs Wall Street  window={}  data={}", r.window, r.data_window);
    let _ = writeln!(
        out,
        "index={}  etf={}  sector={}  available={}",
        r.index_ticker,
        r.etf,
        r.sector,
        r.available_etfs.join(",")
    );

    match &r.unemployment {
        Some(u) => {
            let _ = writeln!(
                out,
                "unemployment {}: {:.1}%  MoM {}  YoY {}",
                u.month,
                u.value,
                delta(u.mom),
                delta(u.yoy)
            );
        }
        None => {
            let _ = writeln!(out, "unemployment: n/a");
        }
    }
    let _ = writeln!(out, "{}", momentum_line(&r.index_ticker, &r.index_momentum));
    let _ = writeln!(out, "{}", momentum_line(&r.etf, &r.etf_momentum));
    let _ = writeln!(
        out,
        "corr({} return, {} jobs growth): {}",
        r.etf,
        r.sector,
        stat(&r.etf_vs_sector_jobs, false)
    );
    let _ = writeln!(
        out,
        "corr({} return, unemployment): {}",
        r.index_ticker,
        stat(&r.correlations.index_vs_unemployment, false)
    );
    let _ = writeln!(
        out,
        "corr({} return, unemployment): {}",
        r.etf,
        stat(&r.correlations.etf_vs_unemployment, false)
    );
    for label in &r.empty_series {
        let _ = writeln!(out, "warning: no data for {label} in window");
    }

    frame(&mut out, "market vs unemployment", &r.market_chart);
    frame(&mut out, "sector ETF vs sector jobs", &r.sector_chart);
    out
}
