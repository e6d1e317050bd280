//! Data quality summary for a normalized monthly batch.
//!
//! Reports:
//! - total row count
//! - per-entity row count and first / last month
//! - null count per nullable column
//! - month gaps per entity (consecutive rows more than one month apart)
//!
//! Informational only; a dirty report never blocks a load.

use std::collections::BTreeMap;
use std::fmt;

use crate::period::Month;
use crate::schema::{CleanBatch, Value};

/// Entity label for tables without an entity column.
const SINGLE_SERIES: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySummary {
    pub rows: usize,
    pub first: Month,
    pub last: Month,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapIssue {
    pub entity: String,
    /// Last month present before the gap.
    pub prev: Month,
    /// First month present after the gap.
    pub next: Month,
    /// Number of missing months in between (>= 1).
    pub missing_months: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReport {
    pub table: &'static str,
    pub total_rows: usize,
    /// Keyed by entity (`*` for single-series tables), sorted.
    pub entities: BTreeMap<String, EntitySummary>,
    /// Keyed by column name; only nullable columns appear.
    pub null_counts: BTreeMap<&'static str, usize>,
    /// Sorted by `(entity, prev)`.
    pub gaps: Vec<GapIssue>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn first_month(&self) -> Option<Month> {
        self.entities.values().map(|e| e.first).min()
    }

    pub fn last_month(&self) -> Option<Month> {
        self.entities.values().map(|e| e.last).max()
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "QualityReport {} {{", self.table)?;
        writeln!(f, "  total_rows: {}", self.total_rows)?;
        writeln!(f, "  entities: {}", self.entities.len())?;
        for (k, e) in &self.entities {
            writeln!(f, "    {k}: rows={} first={} last={}", e.rows, e.first, e.last)?;
        }
        for (c, n) in &self.null_counts {
            writeln!(f, "  nulls[{c}]: {n}")?;
        }
        writeln!(f, "  gaps: {}", self.gaps.len())?;
        for g in &self.gaps {
            writeln!(
                f,
                "    entity={} prev={} next={} missing={}",
                g.entity, g.prev, g.next, g.missing_months
            )?;
        }
        write!(f, "}}")
    }
}

/// Summarise `batch`. Rows without a readable period are ignored.
pub fn build_quality_report(batch: &CleanBatch) -> QualityReport {
    let schema = batch.schema;
    let period_i = schema.period_index();
    let entity_i = schema.entity_index();

    let mut null_counts: BTreeMap<&'static str, usize> = schema
        .columns
        .iter()
        .filter(|c| c.nullable)
        .map(|c| (c.name, 0))
        .collect();

    let mut months: BTreeMap<String, Vec<Month>> = BTreeMap::new();
    for row in &batch.rows {
        for (i, col) in schema.columns.iter().enumerate() {
            if col.nullable && row.get(i).map_or(true, Value::is_null) {
                *null_counts.entry(col.name).or_insert(0) += 1;
            }
        }

        let Some(m) = period_i
            .and_then(|i| row.get(i))
            .and_then(Value::as_date)
            .map(Month::from_date)
        else {
            continue;
        };
        let entity = entity_i
            .and_then(|i| row.get(i))
            .and_then(Value::as_text)
            .unwrap_or(SINGLE_SERIES)
            .to_string();
        months.entry(entity).or_default().push(m);
    }

    let mut entities = BTreeMap::new();
    let mut gaps = Vec::new();
    for (entity, mut ms) in months {
        ms.sort_unstable();
        ms.dedup();
        for w in ms.windows(2) {
            let step = w[0].months_until(&w[1]);
            if step > 1 {
                gaps.push(GapIssue {
                    entity: entity.clone(),
                    prev: w[0],
                    next: w[1],
                    missing_months: step - 1,
                });
            }
        }
        if let (Some(first), Some(last)) = (ms.first().copied(), ms.last().copied()) {
            entities.insert(
                entity,
                EntitySummary {
                    rows: ms.len(),
                    first,
                    last,
                },
            );
        }
    }

    QualityReport {
        table: schema.name,
        total_rows: batch.rows.len(),
        entities,
        null_counts,
        gaps,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::provider::{RawPeriod, RawRecord};
    use crate::schema::{EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT};

    fn px(t: &str, d: &str) -> RawRecord {
        RawRecord::new(Some(t.into()), RawPeriod::Date(d.into())).with_field("adj_close", "10")
    }

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn summarises_entities_nulls_and_gaps() {
        let batch = normalize(
            &[
                px("XLK", "2020-01-31"),
                px("XLK", "2020-02-28"),
                px("XLK", "2020-05-29"),
                px("XLF", "2020-03-31"),
            ],
            &EQUITY_MONTHLY,
        );
        let r = build_quality_report(&batch);

        assert_eq!(r.table, "equity_monthly");
        assert_eq!(r.total_rows, 4);
        assert_eq!(r.entities["XLK"].rows, 3);
        assert_eq!(r.entities["XLK"].first, m("2020-01"));
        assert_eq!(r.entities["XLF"].last, m("2020-03"));
        assert_eq!(r.null_counts.get("monthly_return"), Some(&4));
        assert_eq!(
            r.gaps,
            vec![GapIssue {
                entity: "XLK".into(),
                prev: m("2020-02"),
                next: m("2020-05"),
                missing_months: 2,
            }]
        );
        assert!(!r.is_clean());
        assert_eq!(r.first_month(), Some(m("2020-01")));
        assert_eq!(r.last_month(), Some(m("2020-05")));
    }

    #[test]
    fn single_series_table_uses_star_entity() {
        let rec = |p: &str| {
            RawRecord::new(
                None,
                RawPeriod::YearPeriod {
                    year: "2023".into(),
                    period: p.into(),
                },
            )
            .with_field("unemployment_rate", "3.5")
        };
        let batch = normalize(&[rec("M11"), rec("M12")], &HEADLINE_UNEMPLOYMENT);
        let r = build_quality_report(&batch);
        assert!(r.is_clean());
        assert_eq!(r.entities[SINGLE_SERIES].rows, 2);
        assert!(r.null_counts.is_empty());
        assert!(r.to_string().contains("headline_unemployment"));
    }

    #[test]
    fn empty_batch_report() {
        let r = build_quality_report(&normalize(&[], &EQUITY_MONTHLY));
        assert_eq!(r.total_rows, 0);
        assert!(r.entities.is_empty());
        assert_eq!(r.first_month(), None);
    }
}
