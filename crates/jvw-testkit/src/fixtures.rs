//! Batch and raw-record builders shared by scenario tests.

use jvw_db::{UpsertError, UpsertStore};
use jvw_md::schema::{CleanBatch, Row, Value, EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT, SECTOR_EMPLOYMENT};
use jvw_md::universe::{ces_sector_name, INDEX_TICKER};
use jvw_md::{attach_monthly_returns, Month, RawPeriod, RawRecord};

/// `values` laid on consecutive months from `start`. Stops early if the
/// calendar runs out.
pub fn consecutive(start: Month, values: &[f64]) -> Vec<(Month, f64)> {
    values
        .iter()
        .enumerate()
        .map_while(|(i, v)| start.offset(i as i64).map(|m| (m, *v)))
        .collect()
}

/// `n` prices starting at `first`, compounding at `growth` per month.
pub fn compounding(first: f64, growth: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| first * (1.0 + growth).powi(i as i32)).collect()
}

pub fn unemployment_batch(points: &[(Month, f64)]) -> CleanBatch {
    let rows = points
        .iter()
        .map(|(m, v)| Row::new(vec![Value::Date(m.first_day()), Value::Float(*v)]))
        .collect();
    let mut b = CleanBatch::new(&HEADLINE_UNEMPLOYMENT, rows);
    b.sort_canonical();
    b
}

pub fn sector_batch(code: &str, points: &[(Month, f64)]) -> CleanBatch {
    let name = ces_sector_name(code).unwrap_or(code);
    let rows = points
        .iter()
        .map(|(m, v)| {
            Row::new(vec![
                Value::Date(m.first_day()),
                Value::Text(code.to_string()),
                Value::Text(name.to_string()),
                Value::Float(*v),
            ])
        })
        .collect();
    let mut b = CleanBatch::new(&SECTOR_EMPLOYMENT, rows);
    b.sort_canonical();
    b
}

/// Equity rows with `monthly_return` derived from consecutive prices.
pub fn equity_batch(ticker: &str, points: &[(Month, f64)]) -> CleanBatch {
    let rows = points
        .iter()
        .map(|(m, px)| {
            Row::new(vec![
                Value::Date(m.first_day()),
                Value::Text(ticker.to_string()),
                Value::Float(*px),
                Value::Null,
            ])
        })
        .collect();
    let mut b = CleanBatch::new(&EQUITY_MONTHLY, rows);
    b.sort_canonical();
    attach_monthly_returns(&mut b);
    b
}

/// BLS-shaped raw record (`value` field, `Mxx` period).
pub fn bls_record(series_id: &str, year: i32, period: &str, value: &str) -> RawRecord {
    RawRecord::new(
        Some(series_id.to_string()),
        RawPeriod::YearPeriod {
            year: year.to_string(),
            period: period.to_string(),
        },
    )
    .with_field("value", value)
}

/// Chart-shaped raw record (`adj_close` field, dated period).
pub fn chart_record(ticker: &str, date: &str, adj_close: &str) -> RawRecord {
    RawRecord::new(Some(ticker.to_string()), RawPeriod::Date(date.to_string()))
        .with_field("adj_close", adj_close)
}

pub const MANUFACTURING: &str = "CES3000000001";
pub const INFORMATION: &str = "CES5000000001";

/// Fill all three tables with `months` months from `start`: the index,
/// XLB and XLK, the two CES sectors they map to, and a drifting
/// unemployment rate.
pub async fn seed_dashboard<S: UpsertStore>(
    store: &S,
    start: Month,
    months: usize,
) -> Result<(), UpsertError> {
    let rate: Vec<f64> = (0..months).map(|i| 4.0 + 0.1 * (i % 5) as f64).collect();
    let u = unemployment_batch(&consecutive(start, &rate));
    store.upsert(u.schema.name, &u, u.schema.primary_key).await?;

    for (code, first, growth) in [(MANUFACTURING, 12_800.0, 0.001), (INFORMATION, 3_000.0, 0.004)] {
        let b = sector_batch(code, &consecutive(start, &compounding(first, growth, months)));
        store.upsert(b.schema.name, &b, b.schema.primary_key).await?;
    }

    for (ticker, first, growth) in [(INDEX_TICKER, 4_000.0, 0.01), ("XLB", 80.0, 0.002), ("XLK", 150.0, 0.02)] {
        let b = equity_batch(ticker, &consecutive(start, &compounding(first, growth, months)));
        store.upsert(b.schema.name, &b, b.schema.primary_key).await?;
    }
    Ok(())
}
