//! Typed table descriptors and the normalized batch that flows into storage.
//!
//! A [`TableSchema`] is the single source of truth for a persisted series
//! table: ordered columns with their type and nullability, the primary key,
//! and which column (if any) carries the entity key. The normalizer checks
//! raw records against it, the upsert layer builds SQL from it, and the
//! alignment layer validates query specs with it.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

pub use crate::normalizer::NormalizeReport;

/// Column holding the month key in every series table.
pub const PERIOD_COLUMN: &str = "period_date";

// ---------------------------------------------------------------------------
// Column + value types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnType {
    Date,
    Text,
    Float,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Date => "date",
            ColumnType::Text => "text",
            ColumnType::Float => "float",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// A typed cell. `Float` is always finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Date(NaiveDate),
    Text(String),
    Float(f64),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether the value may be stored in a column of type `ty`.
    pub fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Date(_), ColumnType::Date)
                | (Value::Text(_), ColumnType::Text)
                | (Value::Float(_), ColumnType::Float)
        )
    }

    /// Key form of this value. Only dates and text can be key parts.
    pub fn key_part(&self) -> Option<KeyPart> {
        match self {
            Value::Date(d) => Some(KeyPart::Date(*d)),
            Value::Text(s) => Some(KeyPart::Text(s.clone())),
            Value::Float(_) | Value::Null => None,
        }
    }

    /// CSV / display form; nulls render as an empty string.
    pub fn render(&self) -> String {
        match self {
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Text(s) => s.clone(),
            Value::Float(v) => v.to_string(),
            Value::Null => String::new(),
        }
    }
}

/// One component of a primary-key tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Date(NaiveDate),
    Text(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            KeyPart::Text(s) => f.write_str(s),
        }
    }
}

pub type RowKey = Vec<KeyPart>;

// ---------------------------------------------------------------------------
// Table schema
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TableSchema {
    pub name: &'static str,
    /// Ordered; rows store values in this order.
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static [&'static str],
    /// Column carrying the entity key (ticker, sector code), if any.
    pub entity_column: Option<&'static str>,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn period_index(&self) -> Option<usize> {
        self.column_index(PERIOD_COLUMN)
    }

    pub fn entity_index(&self) -> Option<usize> {
        self.entity_column.and_then(|c| self.column_index(c))
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Resolve key column names to indexes; `Err` names the first unknown column.
    pub fn key_indexes<'a>(&self, key_columns: &[&'a str]) -> Result<Vec<usize>, &'a str> {
        key_columns
            .iter()
            .map(|k| self.column_index(k).ok_or(*k))
            .collect()
    }

    /// Every table has the month key; everything else is table-specific.
    pub fn lookup(name: &str) -> Option<&'static TableSchema> {
        ALL_TABLES.iter().copied().find(|t| t.name == name)
    }
}

pub static HEADLINE_UNEMPLOYMENT: TableSchema = TableSchema {
    name: "headline_unemployment",
    columns: &[
        ColumnDef::required(PERIOD_COLUMN, ColumnType::Date),
        ColumnDef::required("unemployment_rate", ColumnType::Float),
    ],
    primary_key: &[PERIOD_COLUMN],
    entity_column: None,
};

pub static SECTOR_EMPLOYMENT: TableSchema = TableSchema {
    name: "sector_employment",
    columns: &[
        ColumnDef::required(PERIOD_COLUMN, ColumnType::Date),
        ColumnDef::required("sector_code", ColumnType::Text),
        ColumnDef::required("sector_name", ColumnType::Text),
        ColumnDef::required("employment_thousands", ColumnType::Float),
    ],
    primary_key: &[PERIOD_COLUMN, "sector_code"],
    entity_column: Some("sector_code"),
};

pub static EQUITY_MONTHLY: TableSchema = TableSchema {
    name: "equity_monthly",
    columns: &[
        ColumnDef::required(PERIOD_COLUMN, ColumnType::Date),
        ColumnDef::required("ticker", ColumnType::Text),
        ColumnDef::required("adj_close", ColumnType::Float),
        ColumnDef::nullable("monthly_return", ColumnType::Float),
    ],
    primary_key: &[PERIOD_COLUMN, "ticker"],
    entity_column: Some("ticker"),
};

pub static ALL_TABLES: &[&TableSchema] =
    &[&HEADLINE_UNEMPLOYMENT, &SECTOR_EMPLOYMENT, &EQUITY_MONTHLY];

// ---------------------------------------------------------------------------
// Rows and batches
// ---------------------------------------------------------------------------

/// One row, values in schema column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn set(&mut self, idx: usize, v: Value) {
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = v;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Key tuple at `idx`; `None` if any part is null or not a key type.
    pub fn key(&self, idx: &[usize]) -> Option<RowKey> {
        idx.iter()
            .map(|i| self.values.get(*i).and_then(Value::key_part))
            .collect()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A normalized batch for one table: typed, deduplicated, sorted by
/// `(entity, period)`.
#[derive(Debug, Clone)]
pub struct CleanBatch {
    pub schema: &'static TableSchema,
    pub rows: Vec<Row>,
    pub report: NormalizeReport,
}

impl CleanBatch {
    pub fn new(schema: &'static TableSchema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            report: NormalizeReport::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Zero rows after cleaning: callers skip the upsert and warn.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop rows dated before `first`; returns how many were removed.
    pub fn retain_from(&mut self, first: NaiveDate) -> usize {
        let Some(p) = self.schema.period_index() else {
            return 0;
        };
        let before = self.rows.len();
        self.rows
            .retain(|r| r.get(p).and_then(Value::as_date).map_or(true, |d| d >= first));
        let removed = before - self.rows.len();
        self.report.rows_out = self.rows.len();
        self.report.outside_window += removed;
        removed
    }

    /// Sort ascending by entity key then period.
    pub fn sort_canonical(&mut self) {
        let entity = self.schema.entity_index();
        let period = self.schema.period_index();
        self.rows.sort_by(|a, b| {
            let by_entity = match entity {
                Some(i) => cmp_key_part(a.get(i), b.get(i)),
                None => Ordering::Equal,
            };
            by_entity.then_with(|| match period {
                Some(i) => cmp_key_part(a.get(i), b.get(i)),
                None => Ordering::Equal,
            })
        });
    }
}

fn cmp_key_part(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.and_then(Value::key_part);
    let b = b.and_then(Value::key_part);
    a.cmp(&b)
}
