//! Month-keyed series, query specs, and the join that lines them up.
//!
//! Everything in this module is pure. Fetching a [`MonthlySeries`] for a
//! [`SeriesSpec`] is the job of a [`crate::engine::SeriesSource`].

use std::collections::{BTreeMap, BTreeSet};

use jvw_md::schema::{ColumnType, TableSchema};
use jvw_md::{Month, Window};
use serde::Serialize;

use crate::engine::AlignError;

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// How several observations in one month collapse to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Mean,
    /// Latest observation by date within the month.
    Last,
    Max,
    Min,
    Sum,
}

impl Reducer {
    /// Reduce `values` (in date order). Non-finite values are ignored;
    /// `None` when nothing remains.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        let mut it = values.iter().copied().filter(|v| v.is_finite());
        match self {
            Reducer::Last => it.last(),
            Reducer::Max => it.reduce(f64::max),
            Reducer::Min => it.reduce(f64::min),
            Reducer::Sum => it.reduce(|a, b| a + b),
            Reducer::Mean => {
                let (sum, n) = it.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
        }
    }

    /// SQL aggregate for the Postgres source (`Last` is special-cased there).
    pub fn sql_aggregate(&self) -> &'static str {
        match self {
            Reducer::Mean => "avg",
            Reducer::Last => "last",
            Reducer::Max => "max",
            Reducer::Min => "min",
            Reducer::Sum => "sum",
        }
    }
}

// ---------------------------------------------------------------------------
// Series specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesFilter {
    pub column: String,
    pub value: String,
}

/// One series to pull from a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesSpec {
    pub label: String,
    pub table: String,
    pub value_column: String,
    pub filter: Option<SeriesFilter>,
    pub reducer: Reducer,
}

impl SeriesSpec {
    pub fn new(
        label: impl Into<String>,
        table: impl Into<String>,
        value_column: impl Into<String>,
        reducer: Reducer,
    ) -> Self {
        Self {
            label: label.into(),
            table: table.into(),
            value_column: value_column.into(),
            filter: None,
            reducer,
        }
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(SeriesFilter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Check table and columns against the known schemas.
    ///
    /// Identifiers that pass here are the only ones a SQL source may
    /// interpolate.
    pub fn validate(&self) -> Result<&'static TableSchema, AlignError> {
        let schema = TableSchema::lookup(&self.table)
            .ok_or_else(|| AlignError::Config(format!("unknown table '{}'", self.table)))?;

        match schema.column(&self.value_column) {
            Some(c) if c.ty == ColumnType::Float => {}
            Some(_) => {
                return Err(AlignError::Config(format!(
                    "{}.{} is not a numeric column",
                    self.table, self.value_column
                )))
            }
            None => {
                return Err(AlignError::Config(format!(
                    "unknown column {}.{}",
                    self.table, self.value_column
                )))
            }
        }

        if let Some(f) = &self.filter {
            match schema.column(&f.column) {
                Some(c) if c.ty == ColumnType::Text => {}
                Some(_) => {
                    return Err(AlignError::Config(format!(
                        "filter column {}.{} is not a text column",
                        self.table, f.column
                    )))
                }
                None => {
                    return Err(AlignError::Config(format!(
                        "unknown filter column {}.{}",
                        self.table, f.column
                    )))
                }
            }
        }

        if self.label.trim().is_empty() {
            return Err(AlignError::Config("series label is empty".to_string()));
        }
        Ok(schema)
    }
}

// ---------------------------------------------------------------------------
// Series + frames
// ---------------------------------------------------------------------------

/// One reduced value per month, ordered by month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySeries {
    label: String,
    points: BTreeMap<Month, f64>,
}

impl MonthlySeries {
    pub fn new(label: String, points: BTreeMap<Month, f64>) -> Self {
        Self { label, points }
    }

    pub fn empty(label: impl Into<String>) -> Self {
        Self::new(label.into(), BTreeMap::new())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn points(&self) -> &BTreeMap<Month, f64> {
        &self.points
    }

    pub fn get(&self, m: Month) -> Option<f64> {
        self.points.get(&m).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.values().copied().collect()
    }

    pub fn restrict(&self, window: &Window) -> MonthlySeries {
        MonthlySeries::new(
            self.label.clone(),
            self.points
                .range(window.start()..=window.end())
                .map(|(m, v)| (*m, *v))
                .collect(),
        )
    }

    /// Group raw `(month, value)` observations (in date order) and reduce.
    pub fn from_observations<I>(label: impl Into<String>, obs: I, reducer: Reducer) -> Self
    where
        I: IntoIterator<Item = (Month, f64)>,
    {
        let mut grouped: BTreeMap<Month, Vec<f64>> = BTreeMap::new();
        for (m, v) in obs {
            grouped.entry(m).or_default().push(v);
        }
        let points = grouped
            .into_iter()
            .filter_map(|(m, vs)| reducer.apply(&vs).map(|v| (m, v)))
            .collect();
        Self::new(label.into(), points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedRow {
    pub month: Month,
    /// One value per non-empty series, in `AlignedFrame::labels` order.
    pub values: Vec<f64>,
}

/// Inner join of the non-empty series on month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedFrame {
    pub window: Window,
    pub labels: Vec<String>,
    pub rows: Vec<AlignedRow>,
    /// Labels of series with no data in the window (excluded from the join).
    pub empty: Vec<String>,
}

impl AlignedFrame {
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Extract one column as a series over the joined months.
    pub fn series(&self, label: &str) -> Option<MonthlySeries> {
        let i = self.column_index(label)?;
        let points = self
            .rows
            .iter()
            .filter_map(|r| r.values.get(i).map(|v| (r.month, *v)))
            .collect();
        Some(MonthlySeries::new(label.to_string(), points))
    }

    pub fn is_empty_series(&self, label: &str) -> bool {
        self.empty.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OuterRow {
    pub month: Month,
    pub values: Vec<Option<f64>>,
}

/// Union of months; gaps are `None`. Used for gap reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OuterFrame {
    pub window: Window,
    pub labels: Vec<String>,
    pub rows: Vec<OuterRow>,
    pub empty: Vec<String>,
}

impl OuterFrame {
    /// Months where at least one series is missing.
    pub fn gap_months(&self) -> Vec<Month> {
        self.rows
            .iter()
            .filter(|r| r.values.iter().any(Option::is_none))
            .map(|r| r.month)
            .collect()
    }
}

fn split_empty(window: &Window, series: &[MonthlySeries]) -> (Vec<MonthlySeries>, Vec<String>) {
    let mut present = Vec::new();
    let mut empty = Vec::new();
    for s in series {
        let r = s.restrict(window);
        if r.is_empty() {
            empty.push(s.label().to_string());
        } else {
            present.push(r);
        }
    }
    (present, empty)
}

/// Inner join on month within `window`. Series with no points in the window
/// are listed in `empty` and do not shrink the join.
pub fn inner_join(window: Window, series: &[MonthlySeries]) -> AlignedFrame {
    let (present, empty) = split_empty(&window, series);

    let mut rows = Vec::new();
    if let Some((first, rest)) = present.split_first() {
        for (m, v) in first.points() {
            let mut values = Vec::with_capacity(present.len());
            values.push(*v);
            let mut complete = true;
            for s in rest {
                match s.get(*m) {
                    Some(x) => values.push(x),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                rows.push(AlignedRow { month: *m, values });
            }
        }
    }

    AlignedFrame {
        window,
        labels: present.iter().map(|s| s.label().to_string()).collect(),
        rows,
        empty,
    }
}

/// Outer join on month within `window`.
pub fn outer_join(window: Window, series: &[MonthlySeries]) -> OuterFrame {
    let (present, empty) = split_empty(&window, series);
    let months: BTreeSet<Month> = present
        .iter()
        .flat_map(|s| s.points().keys().copied())
        .collect();

    let rows = months
        .into_iter()
        .map(|m| OuterRow {
            month: m,
            values: present.iter().map(|s| s.get(m)).collect(),
        })
        .collect();

    OuterFrame {
        window,
        labels: present.iter().map(|s| s.label().to_string()).collect(),
        rows,
        empty,
    }
}

/// `[max of starts, min of ends]`; `None` for no ranges or no overlap.
pub fn default_window(ranges: &[Window]) -> Option<Window> {
    let start = ranges.iter().map(Window::start).max()?;
    let end = ranges.iter().map(Window::end).min()?;
    Window::new(start, end).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
