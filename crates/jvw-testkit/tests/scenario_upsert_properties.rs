//! Upsert contract properties, checked against the in-memory store (which
//! shares its validation and collapse step with the Postgres store).

use jvw_db::UpsertStore;
use jvw_md::schema::{CleanBatch, Row, Value, EQUITY_MONTHLY};
use jvw_md::Month;
use jvw_testkit::MemoryStore;
use proptest::prelude::*;

const TICKERS: [&str; 3] = ["^GSPC", "XLK", "XLB"];

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn row(month_idx: i64, ticker_idx: usize, px: f64, ret: Option<f64>) -> Row {
    let m = Month::new(2020, 1).unwrap().offset(month_idx).unwrap();
    Row::new(vec![
        Value::Date(m.first_day()),
        Value::Text(TICKERS[ticker_idx].to_string()),
        Value::Float(px),
        ret.map(Value::Float).unwrap_or(Value::Null),
    ])
}

fn rows_strategy() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(
        (
            0i64..24,
            0usize..TICKERS.len(),
            1.0..1000.0f64,
            prop::option::of(-0.5..0.5f64),
        )
            .prop_map(|(m, t, px, r)| row(m, t, px, r)),
        0..40,
    )
}

fn upsert(store: &MemoryStore, rows: Vec<Row>) -> jvw_db::UpsertOutcome {
    let batch = CleanBatch::new(&EQUITY_MONTHLY, rows);
    rt().block_on(store.upsert("equity_monthly", &batch, EQUITY_MONTHLY.primary_key))
        .unwrap()
}

fn key_of(r: &Row) -> (Value, Value) {
    (r.get(0).cloned().unwrap(), r.get(1).cloned().unwrap())
}

proptest! {
    #[test]
    fn upserting_twice_changes_nothing(rows in rows_strategy()) {
        let store = MemoryStore::new();
        upsert(&store, rows.clone());
        let once = store.rows("equity_monthly");

        let second = upsert(&store, rows);
        prop_assert_eq!(store.rows("equity_monthly"), once);
        prop_assert_eq!(second.inserted, 0);
    }

    #[test]
    fn disjoint_batches_commute(rows in rows_strategy()) {
        // Split by ticker so the two batches share no key.
        let (a, b): (Vec<Row>, Vec<Row>) = rows
            .into_iter()
            .partition(|r| r.get(1).and_then(Value::as_text) == Some(TICKERS[0]));

        let ab = MemoryStore::new();
        upsert(&ab, a.clone());
        upsert(&ab, b.clone());

        let ba = MemoryStore::new();
        upsert(&ba, b);
        upsert(&ba, a);

        prop_assert_eq!(ab.rows("equity_monthly"), ba.rows("equity_monthly"));
    }

    #[test]
    fn union_batch_matches_sequential_batches(
        prior in rows_strategy(),
        b1 in rows_strategy(),
        b2 in rows_strategy(),
    ) {
        // Keys may overlap; B2 comes later in the union, so it wins there too.
        let union: Vec<Row> = b1.iter().chain(b2.iter()).cloned().collect();

        let at_once = MemoryStore::new();
        upsert(&at_once, prior.clone());
        upsert(&at_once, union);

        let in_turn = MemoryStore::new();
        upsert(&in_turn, prior);
        upsert(&in_turn, b1);
        upsert(&in_turn, b2);

        prop_assert_eq!(at_once.rows("equity_monthly"), in_turn.rows("equity_monthly"));
    }

    #[test]
    fn last_writer_wins_per_key(first in rows_strategy(), second in rows_strategy()) {
        let store = MemoryStore::new();
        upsert(&store, first.clone());
        upsert(&store, second.clone());

        let stored = store.rows("equity_monthly");
        for r in &stored {
            let k = key_of(r);
            // Latest occurrence of this key across both batches, in write order.
            let expected = first
                .iter()
                .chain(second.iter())
                .filter(|x| key_of(x) == k)
                .last()
                .unwrap();
            prop_assert_eq!(r, expected);
        }

        let mut keys: Vec<String> = first
            .iter()
            .chain(second.iter())
            .map(|r| format!("{:?}", key_of(r)))
            .collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(stored.len(), keys.len());
    }
}

#[test]
fn counts_split_between_inserted_and_updated() {
    let store = MemoryStore::new();
    upsert(&store, vec![row(0, 0, 10.0, None), row(1, 0, 11.0, Some(0.1))]);
    let out = upsert(
        &store,
        vec![row(1, 0, 12.0, None), row(2, 0, 13.0, None), row(2, 0, 14.0, None)],
    );
    assert_eq!(out.inserted, 1);
    assert_eq!(out.updated, 1);
    assert_eq!(out.collapsed, 1);
    assert_eq!(out.rows_affected, 2);

    // Explicit null replaced the earlier return.
    let stored = store.rows("equity_monthly");
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[1].get(3), Some(&Value::Null));
    assert_eq!(stored[2].get(2), Some(&Value::Float(14.0)));
}

#[test]
fn non_unique_conflict_target_fails_without_writing() {
    let store = MemoryStore::new();
    let batch = CleanBatch::new(&EQUITY_MONTHLY, vec![row(0, 0, 10.0, None)]);
    let err = rt()
        .block_on(store.upsert("equity_monthly", &batch, &["period_date"]))
        .unwrap_err();
    assert!(matches!(err, jvw_db::UpsertError::Transaction { .. }), "{err}");
    assert_eq!(store.row_count("equity_monthly"), 0);
}

#[test]
fn conflict_target_column_order_does_not_matter() {
    let store = MemoryStore::new();
    upsert(&store, vec![row(0, 0, 10.0, None)]);

    let batch = CleanBatch::new(&EQUITY_MONTHLY, vec![row(0, 0, 11.0, None)]);
    let out = rt()
        .block_on(store.upsert("equity_monthly", &batch, &["ticker", "period_date"]))
        .unwrap();
    assert_eq!((out.inserted, out.updated), (0, 1));
    assert_eq!(store.row_count("equity_monthly"), 1);
}

#[test]
fn mid_month_date_rejects_the_whole_batch() {
    let store = MemoryStore::new();
    let mut rows = vec![row(0, 0, 10.0, None), row(1, 0, 11.0, None)];
    rows.push(Row::new(vec![
        Value::Date(chrono::NaiveDate::from_ymd_opt(2020, 3, 15).unwrap()),
        Value::Text("XLK".into()),
        Value::Float(12.0),
        Value::Null,
    ]));
    let batch = CleanBatch::new(&EQUITY_MONTHLY, rows);
    let err = rt()
        .block_on(store.upsert("equity_monthly", &batch, EQUITY_MONTHLY.primary_key))
        .unwrap_err();
    assert!(matches!(err, jvw_db::UpsertError::Config(_)), "{err}");
    assert!(err.to_string().contains("2020-03-15"), "{err}");
    assert_eq!(store.row_count("equity_monthly"), 0);
}
