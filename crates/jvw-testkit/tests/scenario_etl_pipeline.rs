use std::time::Duration;

use jvw_db::etl::{fetch_to_csv, ingest_target, load_from_csv, LoadOutcome, Stage, YearRange};
use jvw_md::schema::Value;
use jvw_md::universe::{Target, HEADLINE_SERIES, INDEX_TICKER};
use jvw_md::{FetchError, RetryPolicy};
use jvw_testkit::fixtures::{bls_record, chart_record, MANUFACTURING};
use jvw_testkit::{MemoryStore, StaticFetcher};

fn years() -> YearRange {
    YearRange { start: 2024, end: 2024 }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    }
}

fn unemployment_fetcher() -> StaticFetcher {
    StaticFetcher::new(
        "bls",
        vec![
            bls_record(HEADLINE_SERIES, 2024, "M01", "3.7"),
            bls_record(HEADLINE_SERIES, 2024, "M01", "3.9"),
            bls_record(HEADLINE_SERIES, 2024, "M02", "bad"),
            bls_record(HEADLINE_SERIES, 2024, "M13", "3.8"),
            bls_record(HEADLINE_SERIES, 2024, "M03", "4.1"),
        ],
    )
}

#[tokio::test]
async fn ingest_dedups_drops_and_loads() {
    let store = MemoryStore::new();
    let run = ingest_target(
        &unemployment_fetcher(),
        &store,
        Target::Unemployment,
        years(),
        &policy(),
    )
    .await;

    assert_eq!(run.table, "headline_unemployment");
    assert_eq!(run.records_in, 5);
    assert_eq!(run.rows_out, 2);
    assert_eq!(run.duplicates_collapsed, 1);
    assert_eq!(run.dropped.values().sum::<usize>(), 2);
    assert_eq!(run.gaps, 1);
    match &run.outcome {
        LoadOutcome::Loaded(out) => assert_eq!(out.inserted, 2),
        other => panic!("unexpected outcome {other:?}"),
    }

    let rows = store.rows("headline_unemployment");
    assert_eq!(rows[0].get(1), Some(&Value::Float(3.9)));
    assert_eq!(rows[1].get(1), Some(&Value::Float(4.1)));
}

#[tokio::test(start_paused = true)]
async fn retryable_fetch_errors_are_retried() {
    let store = MemoryStore::new();
    let fetcher = unemployment_fetcher().failing_first(vec![
        FetchError::Http {
            status: 503,
            body: "busy".into(),
        },
        FetchError::Timeout(Duration::from_secs(60)),
    ]);

    let run = ingest_target(&fetcher, &store, Target::Unemployment, years(), &policy()).await;
    assert_eq!(fetcher.calls(), 3);
    assert!(matches!(run.outcome, LoadOutcome::Loaded(_)), "{:?}", run.outcome);
}

#[tokio::test]
async fn terminal_fetch_error_fails_only_that_table() {
    let store = MemoryStore::new();
    let broken = StaticFetcher::new("bls", vec![]).failing_first(vec![FetchError::Api {
        message: "invalid series id".into(),
        retryable: false,
    }]);

    let failed = ingest_target(&broken, &store, Target::Ces, years(), &policy()).await;
    assert!(failed.failed());
    assert!(matches!(
        failed.outcome,
        LoadOutcome::Failed {
            stage: Stage::Fetch,
            retryable: false,
            ..
        }
    ));
    assert_eq!(broken.calls(), 1);

    let ok = ingest_target(&unemployment_fetcher(), &store, Target::Unemployment, years(), &policy()).await;
    assert!(!ok.failed());
    assert_eq!(store.row_count("sector_employment"), 0);
    assert_eq!(store.row_count("headline_unemployment"), 2);
}

#[tokio::test]
async fn upsert_failure_is_reported_not_raised() {
    let store = MemoryStore::new();
    store.fail_table("headline_unemployment");
    let run = ingest_target(&unemployment_fetcher(), &store, Target::Unemployment, years(), &policy()).await;
    assert!(matches!(run.outcome, LoadOutcome::Failed { stage: Stage::Load, .. }));
    assert_eq!(store.row_count("headline_unemployment"), 0);
}

#[tokio::test]
async fn empty_batch_is_skipped() {
    let store = MemoryStore::new();
    let fetcher = StaticFetcher::new("bls", vec![bls_record(HEADLINE_SERIES, 2024, "M01", "-")]);
    let run = ingest_target(&fetcher, &store, Target::Unemployment, years(), &policy()).await;
    assert!(matches!(run.outcome, LoadOutcome::Skipped { .. }));
    assert!(!run.failed());
}

#[tokio::test]
async fn staged_csv_loads_like_a_live_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StaticFetcher::new(
        "yahoo",
        vec![
            chart_record(INDEX_TICKER, "2024-01-01", "4800"),
            chart_record(INDEX_TICKER, "2024-02-01", "5040"),
            chart_record("XLK", "2024-01-01", "200"),
            chart_record("XLK", "2024-02-01", ""),
        ],
    );

    let staged = fetch_to_csv(&fetcher, Target::Equities, years(), &policy(), dir.path()).await;
    let path = match &staged.outcome {
        LoadOutcome::Staged { path } => path.clone(),
        other => panic!("unexpected outcome {other:?}"),
    };
    assert!(path.ends_with("equities_monthly.csv"));
    assert_eq!(staged.rows_out, 3);

    let store = MemoryStore::new();
    let run = load_from_csv(&store, Target::Equities, dir.path()).await;
    assert!(matches!(run.outcome, LoadOutcome::Loaded(_)), "{:?}", run.outcome);

    let rows = store.rows("equity_monthly");
    assert_eq!(rows.len(), 3);
    let feb_index = rows
        .iter()
        .find(|r| {
            r.get(1).and_then(Value::as_text) == Some(INDEX_TICKER)
                && r.get(3).and_then(Value::as_f64).is_some()
        })
        .unwrap();
    let ret = feb_index.get(3).and_then(Value::as_f64).unwrap();
    assert!((ret - 0.05).abs() < 1e-12);
}

#[tokio::test]
async fn missing_staging_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let run = load_from_csv(&store, Target::Ces, dir.path()).await;
    assert!(matches!(run.outcome, LoadOutcome::Skipped { .. }));
    assert!(!run.failed());
}

#[tokio::test]
async fn ces_rows_get_sector_names() {
    let store = MemoryStore::new();
    let fetcher = StaticFetcher::new(
        "bls",
        vec![
            bls_record(MANUFACTURING, 2024, "M01", "12900"),
            bls_record("CES0000000099", 2024, "M01", "1"),
        ],
    );
    // Only ids in the CES universe are requested, so the unknown one is filtered out.
    let run = ingest_target(&fetcher, &store, Target::Ces, years(), &policy()).await;
    assert_eq!(run.rows_out, 1);
    let rows = store.rows("sector_employment");
    assert_eq!(rows[0].get(2).and_then(Value::as_text), Some("Manufacturing"));
}

fn return_on(store: &MemoryStore, ticker: &str, date: &str) -> Option<Value> {
    store
        .rows("equity_monthly")
        .into_iter()
        .find(|r| {
            r.get(0).map(Value::render).as_deref() == Some(date)
                && r.get(1).and_then(Value::as_text) == Some(ticker)
        })
        .and_then(|r| r.get(3).cloned())
}

#[tokio::test]
async fn narrower_reload_keeps_the_first_month_return() {
    let store = MemoryStore::new();
    let fetcher = StaticFetcher::new(
        "yahoo",
        vec![
            chart_record("XLK", "2023-11-01", "90"),
            chart_record("XLK", "2023-12-01", "100"),
            chart_record("XLK", "2024-01-01", "110"),
            chart_record("XLK", "2024-02-01", "121"),
        ],
    );

    let full = ingest_target(
        &fetcher,
        &store,
        Target::Equities,
        YearRange { start: 2023, end: 2024 },
        &policy(),
    )
    .await;
    assert!(matches!(full.outcome, LoadOutcome::Loaded(_)), "{:?}", full.outcome);
    assert_eq!(return_on(&store, "XLK", "2023-11-01"), Some(Value::Null));
    let before = return_on(&store, "XLK", "2024-01-01").and_then(|v| v.as_f64()).unwrap();
    assert!((before - 0.1).abs() < 1e-12);

    let partial = ingest_target(&fetcher, &store, Target::Equities, years(), &policy()).await;
    assert_eq!(partial.records_in, 4);
    assert_eq!(partial.outside_window, 2);
    assert_eq!(partial.rows_out, 2);
    assert_eq!(partial.first_month, "2024-01".parse().ok());
    match &partial.outcome {
        LoadOutcome::Loaded(out) => {
            assert_eq!(out.inserted, 0);
            assert_eq!(out.updated, 2);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let after = return_on(&store, "XLK", "2024-01-01").and_then(|v| v.as_f64()).unwrap();
    assert!((after - before).abs() < 1e-12);
    assert_eq!(store.row_count("equity_monthly"), 4);
}

#[tokio::test]
async fn staged_lookback_gives_the_first_row_a_return() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = StaticFetcher::new(
        "yahoo",
        vec![
            chart_record("XLK", "2023-12-01", "100"),
            chart_record("XLK", "2024-01-01", "105"),
        ],
    );
    let staged = fetch_to_csv(&fetcher, Target::Equities, years(), &policy(), dir.path()).await;
    assert_eq!(staged.rows_out, 1);

    let store = MemoryStore::new();
    load_from_csv(&store, Target::Equities, dir.path()).await;
    let ret = return_on(&store, "XLK", "2024-01-01").and_then(|v| v.as_f64()).unwrap();
    assert!((ret - 0.05).abs() < 1e-12);
}

#[tokio::test]
async fn malformed_staged_rows_are_counted_and_the_rest_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut body = b"period_date,unemployment_rate\n\
                     2024-01-01,3.7\n\
                     2024-02-01,3.8,extra\n"
        .to_vec();
    body.extend_from_slice(b"2024-03-01,\xff\n2024-04-01,4.0\n");
    std::fs::write(dir.path().join(Target::Unemployment.csv_name()), body).unwrap();

    let store = MemoryStore::new();
    let run = load_from_csv(&store, Target::Unemployment, dir.path()).await;
    assert!(matches!(run.outcome, LoadOutcome::Loaded(_)), "{:?}", run.outcome);
    assert_eq!(run.records_in, 4);
    assert_eq!(run.rows_out, 2);
    assert_eq!(run.dropped.get("malformed_row"), Some(&2));
    assert_eq!(store.row_count("headline_unemployment"), 2);
}
