//! In-memory series store for `--dry-run` loads and database-free tests.
//!
//! Same upsert contract as [`PgStore`](crate::PgStore) (it shares
//! [`prepare_batch`]) and the same query semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use jvw_analytics::{MonthlySeries, SeriesSource, SeriesSpec, SourceError};
use jvw_md::schema::{CleanBatch, Row, RowKey, TableSchema, Value};
use jvw_md::{Month, Window};

use crate::upsert::{prepare_batch, UpsertError, UpsertOutcome, UpsertStore};

type Table = BTreeMap<RowKey, Row>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, Table>>,
    failing: Mutex<HashSet<String>>,
    series_loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later upsert into `table` fails with a non-retryable
    /// transaction error and writes nothing.
    pub fn fail_table(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    /// Rows of `table` in primary-key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map_or(0, BTreeMap::len)
    }

    /// Number of `load_series` calls served so far.
    pub fn series_loads(&self) -> usize {
        self.series_loads.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl UpsertStore for MemoryStore {
    async fn upsert(
        &self,
        table: &str,
        batch: &CleanBatch,
        primary_key: &[&str],
    ) -> Result<UpsertOutcome, UpsertError> {
        // Column order inside an ON CONFLICT target is irrelevant; store rows
        // under the table's own key order so reordered targets hit the same keys.
        let canonical = batch.schema.primary_key;
        let same_key = primary_key.len() == canonical.len()
            && primary_key.iter().all(|c| canonical.contains(c));
        let prepared = prepare_batch(
            table,
            batch,
            if same_key { canonical } else { primary_key },
        )?;
        let rows = prepared.rows.len();

        if lock(&self.failing).contains(table) {
            return Err(UpsertError::Transaction {
                table: table.to_string(),
                rows,
                message: "injected failure".to_string(),
                retryable: false,
            });
        }
        // Postgres rejects an ON CONFLICT target that is not a unique key.
        if !same_key {
            return Err(UpsertError::Transaction {
                table: table.to_string(),
                rows,
                message: format!(
                    "no unique constraint matching ({})",
                    primary_key.join(", ")
                ),
                retryable: false,
            });
        }
        if rows == 0 {
            return Ok(UpsertOutcome::noop(table));
        }

        let mut tables = lock(&self.tables);
        let stored = tables.entry(prepared.schema.name).or_default();
        let mut inserted = 0;
        for (key, row) in prepared.rows {
            if stored.insert(key, row).is_none() {
                inserted += 1;
            }
        }
        Ok(UpsertOutcome {
            table: table.to_string(),
            rows_affected: rows,
            inserted,
            updated: rows - inserted,
            collapsed: prepared.collapsed,
        })
    }
}

fn month_of(row: &Row, idx: usize) -> Option<Month> {
    row.get(idx).and_then(Value::as_date).map(Month::from_date)
}

#[async_trait]
impl SeriesSource for MemoryStore {
    async fn load_series(
        &self,
        spec: &SeriesSpec,
        window: &Window,
    ) -> Result<MonthlySeries, SourceError> {
        self.series_loads.fetch_add(1, Ordering::SeqCst);
        let backend = |message: String| SourceError::Backend {
            message,
            retryable: false,
        };
        let schema = TableSchema::lookup(&spec.table)
            .ok_or_else(|| backend(format!("unknown table '{}'", spec.table)))?;
        let period_i = schema
            .period_index()
            .ok_or_else(|| backend(format!("{} has no period column", schema.name)))?;
        let value_i = schema
            .column_index(&spec.value_column)
            .ok_or_else(|| backend(format!("unknown column '{}'", spec.value_column)))?;
        let filter = match &spec.filter {
            Some(f) => Some((
                schema
                    .column_index(&f.column)
                    .ok_or_else(|| backend(format!("unknown column '{}'", f.column)))?,
                f.value.as_str(),
            )),
            None => None,
        };

        let tables = lock(&self.tables);
        let mut obs: Vec<(chrono::NaiveDate, f64)> = tables
            .get(schema.name)
            .into_iter()
            .flat_map(|t| t.values())
            .filter(|row| match filter {
                Some((i, want)) => row.get(i).and_then(Value::as_text) == Some(want),
                None => true,
            })
            .filter_map(|row| {
                let d = row.get(period_i).and_then(Value::as_date)?;
                let v = row.get(value_i).and_then(Value::as_f64)?;
                window.contains(Month::from_date(d)).then_some((d, v))
            })
            .collect();
        obs.sort_by_key(|(d, _)| *d);

        Ok(MonthlySeries::from_observations(
            spec.label.clone(),
            obs.into_iter().map(|(d, v)| (Month::from_date(d), v)),
            spec.reducer,
        ))
    }

    async fn data_range(&self, table: &'static TableSchema) -> Result<Option<Window>, SourceError> {
        let Some(period_i) = table.period_index() else {
            return Ok(None);
        };
        let tables = lock(&self.tables);
        let months: Vec<Month> = tables
            .get(table.name)
            .into_iter()
            .flat_map(|t| t.values())
            .filter_map(|r| month_of(r, period_i))
            .collect();
        let (Some(lo), Some(hi)) = (months.iter().min(), months.iter().max()) else {
            return Ok(None);
        };
        Window::new(*lo, *hi)
            .map(Some)
            .map_err(|e| SourceError::Backend {
                message: e.to_string(),
                retryable: false,
            })
    }

    async fn distinct_entities(
        &self,
        table: &'static TableSchema,
    ) -> Result<Vec<String>, SourceError> {
        let Some(entity_i) = table.entity_index() else {
            return Ok(Vec::new());
        };
        let tables = lock(&self.tables);
        let set: BTreeSet<String> = tables
            .get(table.name)
            .into_iter()
            .flat_map(|t| t.values())
            .filter_map(|r| r.get(entity_i).and_then(Value::as_text).map(str::to_string))
            .collect();
        Ok(set.into_iter().collect())
    }
}
