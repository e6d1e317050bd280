use std::collections::BTreeMap;
use std::time::Duration;

use jvw_analytics::stats::correlation;
use jvw_analytics::{build_dashboard, AlignError, AlignmentEngine, DashboardRequest, MonthlySeries};
use jvw_db::UpsertStore;
use jvw_md::{Month, Window};
use jvw_testkit::fixtures::{
    compounding, consecutive, equity_batch, sector_batch, seed_dashboard, unemployment_batch,
    MANUFACTURING,
};
use jvw_testkit::MemoryStore;

fn m(y: i32, mo: u32) -> Month {
    Month::new(y, mo).unwrap()
}

async fn seeded() -> AlignmentEngine<MemoryStore> {
    let store = MemoryStore::new();
    seed_dashboard(&store, m(2022, 1), 24).await.unwrap();
    AlignmentEngine::new(store, Duration::from_secs(900))
}

#[tokio::test]
async fn default_request_uses_full_overlap_and_prefers_xlk() {
    let engine = seeded().await;
    let r = build_dashboard(&engine, &DashboardRequest::default()).await.unwrap();

    assert_eq!(r.window, Window::new(m(2022, 1), m(2023, 12)).unwrap());
    assert_eq!(r.data_window, r.window);
    assert_eq!(r.index_ticker, "^GSPC");
    assert_eq!(r.available_etfs, vec!["XLB".to_string(), "XLK".to_string()]);
    assert_eq!(r.etf, "XLK");
    assert_eq!(r.sector, "Information");
    assert!(r.empty_series.is_empty(), "{:?}", r.empty_series);
}

#[tokio::test]
async fn default_etf_falls_back_to_first_available() {
    let store = MemoryStore::new();
    let months = 6;
    let u = unemployment_batch(&consecutive(m(2022, 1), &[4.0, 4.1, 4.2, 4.1, 4.0, 3.9]));
    let jobs = sector_batch(MANUFACTURING, &consecutive(m(2022, 1), &compounding(12_800.0, 0.001, months)));
    let index = equity_batch("^GSPC", &consecutive(m(2022, 1), &compounding(4_000.0, 0.01, months)));
    let xlb = equity_batch("XLB", &consecutive(m(2022, 1), &compounding(80.0, 0.002, months)));
    for b in [&u, &jobs, &index, &xlb] {
        store.upsert(b.schema.name, b, b.schema.primary_key).await.unwrap();
    }

    let engine = AlignmentEngine::new(store, Duration::ZERO);
    let r = build_dashboard(&engine, &DashboardRequest::default()).await.unwrap();
    assert_eq!(r.available_etfs, vec!["XLB".to_string()]);
    assert_eq!(r.etf, "XLB");
    assert_eq!(r.sector, "Manufacturing");
}

/// Index returns cycling through four values so the correlation with the
/// five-month unemployment cycle is defined.
fn cycling_closes(first: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let returns: Vec<f64> = (0..n).map(|k| 0.01 * ((k % 4) as f64 - 1.5)).collect();
    let mut closes = vec![first];
    for r in &returns[1..] {
        let last = closes[closes.len() - 1];
        closes.push(last * (1.0 + r));
    }
    (closes, returns)
}

#[tokio::test]
async fn snapshot_correlations_share_the_three_way_overlap() {
    let engine = seeded().await;
    let (closes, returns) = cycling_closes(4_000.0, 24);
    let index = equity_batch("^GSPC", &consecutive(m(2022, 1), &closes));
    // XLF trades only through 2022, so its returns cover Feb..Dec 2022.
    let xlf = equity_batch("XLF", &consecutive(m(2022, 1), &cycling_closes(30.0, 12).0));
    for b in [&index, &xlf] {
        engine
            .source()
            .upsert(b.schema.name, b, b.schema.primary_key)
            .await
            .unwrap();
    }

    let req = DashboardRequest {
        etf: Some("XLF".into()),
        ..DashboardRequest::default()
    };
    let r = build_dashboard(&engine, &req).await.unwrap();

    let rate = |i: usize| 4.0 + 0.1 * (i % 5) as f64;
    let over = |range: std::ops::Range<usize>| {
        let idx: BTreeMap<Month, f64> = range
            .clone()
            .map(|i| (m(2022, 1).offset(i as i64).unwrap(), returns[i]))
            .collect();
        let unemp: BTreeMap<Month, f64> = range
            .map(|i| (m(2022, 1).offset(i as i64).unwrap(), rate(i)))
            .collect();
        correlation(
            &MonthlySeries::new("i".into(), idx),
            &MonthlySeries::new("u".into(), unemp),
        )
        .value()
        .unwrap()
    };
    let joint = over(1..12);
    let index_only = over(1..24);
    assert!((joint - index_only).abs() > 1e-6, "{joint} vs {index_only}");

    let got = r.correlations.index_vs_unemployment.value().unwrap();
    assert!((got - joint).abs() < 1e-9, "{got} vs {joint}");
    assert!(r.correlations.etf_vs_unemployment.value().is_some());
}

#[tokio::test]
async fn kpis_for_requested_etf() {
    let engine = seeded().await;
    let req = DashboardRequest {
        etf: Some("xlk".into()),
        ..DashboardRequest::default()
    };
    let r = build_dashboard(&engine, &req).await.unwrap();
    assert_eq!(r.etf, "XLK");
    assert_eq!(r.sector, "Information");

    let u = r.unemployment.unwrap();
    assert_eq!(u.month, m(2023, 12));
    assert!((u.value - 4.3).abs() < 1e-9);
    assert!((u.mom.unwrap() - 0.1).abs() < 1e-9);
    assert!((u.yoy.unwrap() - 0.2).abs() < 1e-9);

    let m1 = r.etf_momentum.m1.value().unwrap();
    let m12 = r.etf_momentum.m12.value().unwrap();
    assert!((m1 - 0.02).abs() < 1e-9);
    assert!((m12 - (1.02f64.powi(12) - 1.0)).abs() < 1e-9);
    assert!((r.index_momentum.m3.value().unwrap() - (1.01f64.powi(3) - 1.0)).abs() < 1e-9);

    // Charts are rebased to 100 at the first month.
    assert_eq!(r.market_chart.labels[0], "^GSPC (=100)");
    assert_eq!(r.market_chart.labels[1], "unemployment_rate");
    assert!((r.sector_chart.rows[0].values[0].unwrap() - 100.0).abs() < 1e-9);
    assert_eq!(r.market_chart.rows.len(), 24);
}

#[tokio::test]
async fn requested_window_is_clamped_to_data() {
    let engine = seeded().await;
    let req = DashboardRequest {
        start: Some(m(2022, 6)),
        end: Some(m(2030, 1)),
        etf: None,
    };
    let r = build_dashboard(&engine, &req).await.unwrap();
    assert_eq!(r.window, Window::new(m(2022, 6), m(2023, 12)).unwrap());

    let outside = DashboardRequest {
        start: Some(m(2010, 1)),
        end: Some(m(2011, 1)),
        etf: None,
    };
    assert!(matches!(
        build_dashboard(&engine, &outside).await,
        Err(AlignError::Config(_))
    ));
}

#[tokio::test]
async fn short_window_reports_insufficient_momentum() {
    let engine = seeded().await;
    let req = DashboardRequest {
        start: Some(m(2023, 10)),
        end: Some(m(2023, 12)),
        etf: None,
    };
    let r = build_dashboard(&engine, &req).await.unwrap();
    assert!(r.index_momentum.m12.is_insufficient());
    assert!(!r.index_momentum.m1.is_insufficient());
}

#[tokio::test]
async fn etf_without_sector_rows_flags_empty_series() {
    let engine = seeded().await;
    let xle = equity_batch("XLE", &consecutive(m(2022, 1), &compounding(60.0, 0.01, 24)));
    engine
        .source()
        .upsert("equity_monthly", &xle, xle.schema.primary_key)
        .await
        .unwrap();

    let req = DashboardRequest {
        etf: Some("XLE".into()),
        ..DashboardRequest::default()
    };
    let r = build_dashboard(&engine, &req).await.unwrap();
    assert_eq!(r.sector, "Mining and Logging");
    assert_eq!(r.empty_series, vec!["sector_jobs".to_string()]);
    assert!(r.etf_vs_sector_jobs.is_insufficient());
}

#[tokio::test]
async fn unknown_etf_and_empty_store_are_config_errors() {
    let engine = seeded().await;
    let req = DashboardRequest {
        etf: Some("XLRE".into()),
        ..DashboardRequest::default()
    };
    assert!(matches!(build_dashboard(&engine, &req).await, Err(AlignError::Config(_))));

    let empty = AlignmentEngine::new(MemoryStore::new(), Duration::ZERO);
    assert!(matches!(
        build_dashboard(&empty, &DashboardRequest::default()).await,
        Err(AlignError::Config(_))
    ));
}
