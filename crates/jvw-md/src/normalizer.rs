//! Canonical monthly normalization.
//!
//! Converts provider [`RawRecord`]s into a typed [`CleanBatch`] for one
//! [`TableSchema`]: periods truncated to the first of the month, values
//! parsed to their column type, null markers resolved against column
//! nullability, duplicates collapsed (last occurrence wins) and rows sorted
//! by `(entity, period)`.
//!
//! Records that cannot be normalized are dropped and counted in the
//! [`NormalizeReport`]; the batch itself never fails. This module is pure:
//! no I/O and no logging (callers log the report).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

use crate::period::{Month, PeriodError};
use crate::provider::{RawPeriod, RawRecord};
use crate::schema::{
    CleanBatch, ColumnDef, ColumnType, Row, RowKey, TableSchema, Value, PERIOD_COLUMN,
};

// ---------------------------------------------------------------------------
// Errors + report
// ---------------------------------------------------------------------------

/// Why a single record was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unparseable period '{raw}': {reason}")]
    BadPeriod { raw: String, reason: String },
    /// BLS `M13` rows carry an annual average, not a month.
    #[error("annual-average period '{0}' is not a month")]
    AnnualAverage(String),
    #[error("missing entity key")]
    MissingEntityKey,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("null in non-nullable column '{0}'")]
    NullNotAllowed(&'static str),
    #[error("column '{column}': cannot parse '{raw}'")]
    InvalidValue { column: &'static str, raw: String },
    #[error("column '{column}': non-finite value '{raw}'")]
    NonFinite { column: &'static str, raw: String },
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

impl ParseError {
    /// Stable short label used for per-reason drop counts.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::BadPeriod { .. } => "bad_period",
            ParseError::AnnualAverage(_) => "annual_average",
            ParseError::MissingEntityKey => "missing_entity_key",
            ParseError::MissingField(_) => "missing_field",
            ParseError::NullNotAllowed(_) => "null_not_allowed",
            ParseError::InvalidValue { .. } => "invalid_value",
            ParseError::NonFinite { .. } => "non_finite",
            ParseError::MalformedRow(_) => "malformed_row",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Position of the record in the input slice.
    pub index: usize,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub records_in: usize,
    pub rows_out: usize,
    /// Rows discarded because a later record had the same key.
    pub duplicates_collapsed: usize,
    /// Rows fetched only as a base for derived columns, removed before load.
    pub outside_window: usize,
    pub dropped: Vec<DroppedRecord>,
}

impl NormalizeReport {
    /// Count records rejected before normalization (e.g. undecodable CSV rows).
    pub fn absorb(&mut self, rejected: Vec<DroppedRecord>) {
        self.records_in += rejected.len();
        self.dropped.extend(rejected);
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    pub fn drop_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for d in &self.dropped {
            *out.entry(d.error.kind()).or_insert(0) += 1;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize `records` against `schema`.
///
/// Zero surviving rows yields an empty batch, not an error.
pub fn normalize(records: &[RawRecord], schema: &'static TableSchema) -> CleanBatch {
    let mut report = NormalizeReport {
        records_in: records.len(),
        ..NormalizeReport::default()
    };

    let key_idx: Vec<usize> = schema
        .primary_key
        .iter()
        .filter_map(|k| schema.column_index(k))
        .collect();

    let mut by_key: HashMap<RowKey, Row> = HashMap::with_capacity(records.len());
    for (index, rec) in records.iter().enumerate() {
        match normalize_record(rec, schema) {
            Ok(row) => {
                // Every key column is non-null by construction.
                let Some(key) = row.key(&key_idx) else {
                    report.dropped.push(DroppedRecord {
                        index,
                        error: ParseError::MissingEntityKey,
                    });
                    continue;
                };
                if by_key.insert(key, row).is_some() {
                    report.duplicates_collapsed += 1;
                }
            }
            Err(error) => report.dropped.push(DroppedRecord { index, error }),
        }
    }

    let mut batch = CleanBatch::new(schema, by_key.into_values().collect());
    batch.sort_canonical();
    report.rows_out = batch.rows.len();
    batch.report = report;
    batch
}

/// Normalize one record into a row in schema column order.
pub fn normalize_record(rec: &RawRecord, schema: &TableSchema) -> Result<Row, ParseError> {
    let month = parse_period(&rec.period)?;
    let mut values = Vec::with_capacity(schema.columns.len());

    for col in schema.columns {
        let v = if col.name == PERIOD_COLUMN {
            Value::Date(month.first_day())
        } else if schema.entity_column == Some(col.name) {
            let key = rec
                .entity_key
                .as_deref()
                .or_else(|| rec.field(col.name))
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or(ParseError::MissingEntityKey)?;
            Value::Text(key.to_string())
        } else {
            parse_field(col, rec.field(col.name))?
        };
        values.push(v);
    }

    Ok(Row::new(values))
}

/// Resolve a raw period to its calendar month.
pub fn parse_period(p: &RawPeriod) -> Result<Month, ParseError> {
    match p {
        RawPeriod::YearPeriod { year, period } => parse_year_period(year, period),
        RawPeriod::Date(s) => parse_date_period(s),
    }
}

fn parse_year_period(year: &str, period: &str) -> Result<Month, ParseError> {
    let raw = || format!("{year} {period}");
    let bad = |reason: &str| ParseError::BadPeriod {
        raw: raw(),
        reason: reason.to_string(),
    };

    let y: i32 = year.trim().parse().map_err(|_| bad("year is not an integer"))?;
    let p = period.trim();
    let digits = p
        .strip_prefix('M')
        .or_else(|| p.strip_prefix('m'))
        .unwrap_or(p);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad("not a monthly period"));
    }
    let m: u32 = digits.parse().map_err(|_| bad("not a monthly period"))?;
    if m == 13 {
        return Err(ParseError::AnnualAverage(raw()));
    }
    Month::new(y, m).map_err(|e| period_err(raw(), e))
}

fn parse_date_period(s: &str) -> Result<Month, ParseError> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(Month::from_date(dt.date_naive()));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(Month::from_date(dt.date()));
        }
    }
    t.parse::<Month>().map_err(|e| period_err(s.to_string(), e))
}

fn period_err(raw: String, e: PeriodError) -> ParseError {
    ParseError::BadPeriod {
        raw,
        reason: e.to_string(),
    }
}

/// BLS and CSV spell "no value" several ways.
fn is_null_marker(s: &str) -> bool {
    s.is_empty() || s == "-" || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null")
}

fn parse_field(col: &ColumnDef, raw: Option<&str>) -> Result<Value, ParseError> {
    let Some(raw) = raw else {
        return if col.nullable {
            Ok(Value::Null)
        } else {
            Err(ParseError::MissingField(col.name))
        };
    };

    let t = raw.trim();
    if is_null_marker(t) {
        return if col.nullable {
            Ok(Value::Null)
        } else {
            Err(ParseError::NullNotAllowed(col.name))
        };
    }

    match col.ty {
        ColumnType::Float => {
            let v: f64 = t.parse().map_err(|_| ParseError::InvalidValue {
                column: col.name,
                raw: raw.to_string(),
            })?;
            if !v.is_finite() {
                return Err(ParseError::NonFinite {
                    column: col.name,
                    raw: raw.to_string(),
                });
            }
            Ok(Value::Float(v))
        }
        ColumnType::Text => Ok(Value::Text(t.to_string())),
        ColumnType::Date => parse_date_period(t)
            .map(|m| Value::Date(m.first_day()))
            .map_err(|_| ParseError::InvalidValue {
                column: col.name,
                raw: raw.to_string(),
            }),
    }
}

// ---------------------------------------------------------------------------
// Derived columns
// ---------------------------------------------------------------------------

/// Fill `monthly_return` as the fractional change of `adj_close` against the
/// previous row of the same entity. Existing non-null returns are kept; the
/// first row of each entity stays null.
///
/// Expects a canonically sorted batch. Returns the number of cells filled;
/// a no-op for tables without both columns.
pub fn attach_monthly_returns(batch: &mut CleanBatch) -> usize {
    let schema = batch.schema;
    let (Some(price_i), Some(ret_i)) = (
        schema.column_index("adj_close"),
        schema.column_index("monthly_return"),
    ) else {
        return 0;
    };
    let entity_i = schema.entity_index();

    let mut filled = 0;
    let mut prev: Option<(Option<Value>, f64)> = None;
    for row in &mut batch.rows {
        let entity = entity_i.and_then(|i| row.get(i).cloned());
        let price = row.get(price_i).and_then(Value::as_f64);

        if let (Some(p), Some((prev_entity, prev_price))) = (price, prev.as_ref()) {
            let same = *prev_entity == entity;
            let missing = row.get(ret_i).map_or(true, Value::is_null);
            if same && missing && *prev_price != 0.0 {
                let r = p / prev_price - 1.0;
                if r.is_finite() {
                    row.set(ret_i, Value::Float(r));
                    filled += 1;
                }
            }
        }

        prev = price.map(|p| (entity, p));
    }
    filled
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT, SECTOR_EMPLOYMENT};
    use chrono::NaiveDate;

    fn bls(year: &str, period: &str, value: &str) -> RawRecord {
        RawRecord::new(
            None,
            RawPeriod::YearPeriod {
                year: year.to_string(),
                period: period.to_string(),
            },
        )
        .with_field("unemployment_rate", value)
    }

    fn px(ticker: &str, date: &str, close: &str) -> RawRecord {
        RawRecord::new(Some(ticker.to_string()), RawPeriod::Date(date.to_string()))
            .with_field("adj_close", close)
    }

    fn d(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn last_duplicate_wins_and_bad_value_dropped() {
        let recs = vec![
            bls("2024", "M01", "3.7"),
            bls("2024", "M01", "3.9"),
            bls("2024", "M02", "bad"),
        ];
        let batch = normalize(&recs, &HEADLINE_UNEMPLOYMENT);

        assert_eq!(batch.rows.len(), 1);
        assert_eq!(
            batch.rows[0].values(),
            &[Value::Date(d(2024, 1)), Value::Float(3.9)]
        );
        assert_eq!(batch.report.records_in, 3);
        assert_eq!(batch.report.duplicates_collapsed, 1);
        assert_eq!(batch.report.dropped_count(), 1);
        assert_eq!(batch.report.dropped[0].index, 2);
        assert_eq!(batch.report.drop_counts().get("invalid_value"), Some(&1));
    }

    #[test]
    fn annual_average_and_non_monthly_periods_are_errors() {
        let recs = vec![
            bls("2023", "M13", "3.6"),
            bls("2023", "Q01", "3.5"),
            bls("2023", "12", "3.7"),
        ];
        let batch = normalize(&recs, &HEADLINE_UNEMPLOYMENT);
        assert_eq!(batch.rows.len(), 1);
        let kinds = batch.report.drop_counts();
        assert_eq!(kinds.get("annual_average"), Some(&1));
        assert_eq!(kinds.get("bad_period"), Some(&1));
    }

    #[test]
    fn date_strings_truncate_to_month() {
        let recs = vec![
            px("XLK", "2024-03-28", "200.5"),
            px("XLK", "2024-04-30 16:00:00", "201.0"),
            px("XLK", "2024-05-31T20:00:00Z", "202.0"),
            px("XLK", "2024-06", "203.0"),
        ];
        let batch = normalize(&recs, &EQUITY_MONTHLY);
        let months: Vec<NaiveDate> = batch
            .rows
            .iter()
            .map(|r| r.get(0).and_then(Value::as_date).unwrap())
            .collect();
        assert_eq!(months, vec![d(2024, 3), d(2024, 4), d(2024, 5), d(2024, 6)]);
    }

    #[test]
    fn non_nullable_rejects_null_markers_nullable_accepts() {
        let recs = vec![
            px("XLK", "2024-01-31", "-"),
            px("XLK", "2024-02-29", "").with_field("monthly_return", ""),
            px("XLK", "2024-03-29", "10").with_field("monthly_return", "NaN"),
            px("XLK", "2024-04-30", "11").with_field("monthly_return", "null"),
        ];
        let batch = normalize(&recs, &EQUITY_MONTHLY);
        assert_eq!(batch.rows.len(), 2);
        assert!(batch.rows.iter().all(|r| r.get(3) == Some(&Value::Null)));
        assert_eq!(batch.report.drop_counts().get("null_not_allowed"), Some(&2));
    }

    #[test]
    fn non_finite_numbers_dropped() {
        let recs = vec![px("XLK", "2024-01-31", "inf"), px("XLK", "2024-02-29", "1e400")];
        let batch = normalize(&recs, &EQUITY_MONTHLY);
        assert!(batch.is_empty());
        assert_eq!(batch.report.drop_counts().get("non_finite"), Some(&2));
    }

    #[test]
    fn missing_required_field_and_entity() {
        let no_entity = RawRecord::new(None, RawPeriod::Date("2024-01-01".into()))
            .with_field("adj_close", "1");
        let no_field = RawRecord::new(Some("XLK".into()), RawPeriod::Date("2024-01-01".into()));
        let batch = normalize(&[no_entity, no_field], &EQUITY_MONTHLY);
        assert!(batch.is_empty());
        let kinds = batch.report.drop_counts();
        assert_eq!(kinds.get("missing_entity_key"), Some(&1));
        assert_eq!(kinds.get("missing_field"), Some(&1));
    }

    #[test]
    fn sorted_by_entity_then_period() {
        let rec = |code: &str, p: &str| {
            RawRecord::new(
                Some(code.to_string()),
                RawPeriod::YearPeriod {
                    year: "2020".into(),
                    period: p.into(),
                },
            )
            .with_field("sector_name", "x")
            .with_field("employment_thousands", "100")
        };
        let recs = vec![rec("CES9", "M02"), rec("CES1", "M03"), rec("CES9", "M01"), rec("CES1", "M01")];
        let batch = normalize(&recs, &SECTOR_EMPLOYMENT);
        let keys: Vec<(String, NaiveDate)> = batch
            .rows
            .iter()
            .map(|r| {
                (
                    r.get(1).and_then(Value::as_text).unwrap().to_string(),
                    r.get(0).and_then(Value::as_date).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("CES1".into(), d(2020, 1)),
                ("CES1".into(), d(2020, 3)),
                ("CES9".into(), d(2020, 1)),
                ("CES9".into(), d(2020, 2)),
            ]
        );
    }

    #[test]
    fn empty_input_gives_empty_batch() {
        let batch = normalize(&[], &HEADLINE_UNEMPLOYMENT);
        assert!(batch.is_empty());
        assert_eq!(batch.report, NormalizeReport::default());
    }

    #[test]
    fn monthly_returns_per_ticker() {
        let recs = vec![
            px("SPY", "2024-01-31", "100"),
            px("SPY", "2024-02-29", "110"),
            px("SPY", "2024-03-28", "99"),
            px("XLK", "2024-01-31", "50"),
            px("XLK", "2024-02-29", "55").with_field("monthly_return", "0.5"),
        ];
        let mut batch = normalize(&recs, &EQUITY_MONTHLY);
        let filled = attach_monthly_returns(&mut batch);
        assert_eq!(filled, 2);

        let rets: Vec<Option<f64>> = batch.rows.iter().map(|r| r.get(3).and_then(Value::as_f64)).collect();
        assert_eq!(rets[0], None);
        assert!((rets[1].unwrap() - 0.10).abs() < 1e-12);
        assert!((rets[2].unwrap() - (-0.10)).abs() < 1e-12);
        // first row of the next ticker does not chain from SPY
        assert_eq!(rets[3], None);
        // explicit value kept
        assert_eq!(rets[4], Some(0.5));
    }

    #[test]
    fn monthly_returns_noop_without_price_columns() {
        let mut batch = normalize(&[bls("2024", "M01", "3.7")], &HEADLINE_UNEMPLOYMENT);
        assert_eq!(attach_monthly_returns(&mut batch), 0);
    }
}
