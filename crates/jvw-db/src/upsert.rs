//! Idempotent batch upsert.
//!
//! Contract shared by every [`UpsertStore`]:
//! - empty batch: no-op, zero rows
//! - every key column must exist in the batch schema (checked before any write)
//! - every period date must be the first of its month (checked before any write)
//! - duplicate keys inside the batch collapse to the last row
//! - existing key: every non-key column is overwritten, explicit nulls included
//! - new key: inserted; keys outside the batch are untouched
//! - all-or-nothing: one transaction per call
//!
//! [`prepare_batch`] implements the pre-write part so in-memory stores
//! share it exactly.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike;
use jvw_md::schema::{CleanBatch, ColumnType, Row, RowKey, TableSchema, Value};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::PgStore;

/// Postgres caps bind parameters per statement at 65535.
pub const MAX_BIND_PARAMS: usize = 65_535;
/// Rows per statement regardless of width.
pub const MAX_ROWS_PER_STATEMENT: usize = 1_000;

// ---------------------------------------------------------------------------
// Outcome + errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub table: String,
    /// Distinct keys written (after in-batch collapse).
    pub rows_affected: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Rows discarded because a later row in the batch had the same key.
    pub collapsed: usize,
}

impl UpsertOutcome {
    pub fn noop(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum UpsertError {
    /// Caller error detected before any write.
    #[error("upsert config error: {0}")]
    Config(String),
    /// The transaction failed and was rolled back.
    #[error("upsert into {table} failed ({rows} rows rolled back): {message}")]
    Transaction {
        table: String,
        rows: usize,
        message: String,
        retryable: bool,
    },
    /// The deadline expired; the transaction was rolled back.
    #[error("upsert into {table} timed out after {after:?} ({rows} rows rolled back)")]
    Timeout {
        table: String,
        rows: usize,
        after: Duration,
    },
}

impl UpsertError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UpsertError::Config(_) => false,
            UpsertError::Transaction { retryable, .. } => *retryable,
            UpsertError::Timeout { .. } => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait UpsertStore: Send + Sync {
    async fn upsert(
        &self,
        table: &str,
        batch: &CleanBatch,
        primary_key: &[&str],
    ) -> Result<UpsertOutcome, UpsertError>;
}

// ---------------------------------------------------------------------------
// Pre-write validation + collapse
// ---------------------------------------------------------------------------

/// A batch ready to write: distinct keys, ascending key order.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub schema: &'static TableSchema,
    pub key_indexes: Vec<usize>,
    pub rows: Vec<(RowKey, Row)>,
    pub collapsed: usize,
}

impl PreparedBatch {
    /// Non-key column indexes, in schema order.
    pub fn value_indexes(&self) -> Vec<usize> {
        (0..self.schema.columns.len())
            .filter(|i| !self.key_indexes.contains(i))
            .collect()
    }
}

pub fn prepare_batch(
    table: &str,
    batch: &CleanBatch,
    primary_key: &[&str],
) -> Result<PreparedBatch, UpsertError> {
    let schema = batch.schema;
    if schema.name != table {
        return Err(UpsertError::Config(format!(
            "batch for '{}' passed to upsert into '{table}'",
            schema.name
        )));
    }
    if primary_key.is_empty() {
        return Err(UpsertError::Config(format!(
            "no primary key columns given for '{table}'"
        )));
    }

    let key_indexes = schema.key_indexes(primary_key).map_err(|missing| {
        UpsertError::Config(format!(
            "primary key column '{missing}' not in '{table}' columns [{}]",
            schema.column_names().join(", ")
        ))
    })?;
    for &i in &key_indexes {
        let col = &schema.columns[i];
        if col.ty == ColumnType::Float {
            return Err(UpsertError::Config(format!(
                "'{table}.{}' is a float column and cannot be a key",
                col.name
            )));
        }
    }

    let width = schema.columns.len();
    let period_i = schema.period_index();
    let mut by_key: BTreeMap<RowKey, Row> = BTreeMap::new();
    let mut collapsed = 0;
    for (n, row) in batch.rows.iter().enumerate() {
        if row.len() != width {
            return Err(UpsertError::Config(format!(
                "row {n} has {} values, '{table}' has {width} columns",
                row.len()
            )));
        }
        for (v, col) in row.values().iter().zip(schema.columns) {
            if !v.fits(col.ty) || (v.is_null() && !col.nullable) {
                return Err(UpsertError::Config(format!(
                    "row {n}: value {v:?} not valid for column '{}'",
                    col.name
                )));
            }
        }
        // Same rule as the tables' month_start check constraints.
        if let Some(Value::Date(d)) = period_i.and_then(|i| row.values().get(i)) {
            if d.day() != 1 {
                return Err(UpsertError::Config(format!(
                    "row {n}: period date {d} is not the first of a month"
                )));
            }
        }
        let key = row.key(&key_indexes).ok_or_else(|| {
            UpsertError::Config(format!("row {n} has a null key column"))
        })?;
        if by_key.insert(key, row.clone()).is_some() {
            collapsed += 1;
        }
    }

    Ok(PreparedBatch {
        schema,
        key_indexes,
        rows: by_key.into_iter().collect(),
        collapsed,
    })
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn is_retryable_sqlx(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        // serialization_failure, deadlock_detected
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

fn rows_per_statement(width: usize) -> usize {
    (MAX_BIND_PARAMS / width.max(1)).clamp(1, MAX_ROWS_PER_STATEMENT)
}

fn statement_head(p: &PreparedBatch) -> (String, String) {
    let schema = p.schema;
    let cols: Vec<String> = schema.columns.iter().map(|c| quote_ident(c.name)).collect();
    let keys: Vec<String> = p
        .key_indexes
        .iter()
        .map(|i| quote_ident(schema.columns[*i].name))
        .collect();

    let value_idx = p.value_indexes();
    // A key-only table still needs an update clause for `returning` to fire.
    let set_idx = if value_idx.is_empty() {
        p.key_indexes.clone()
    } else {
        value_idx
    };
    let sets: Vec<String> = set_idx
        .iter()
        .map(|i| {
            let c = quote_ident(schema.columns[*i].name);
            format!("{c} = excluded.{c}")
        })
        .collect();

    let head = format!(
        "insert into {} ({}) ",
        quote_ident(schema.name),
        cols.join(", ")
    );
    let tail = format!(
        " on conflict ({}) do update set {} returning (xmax = 0)",
        keys.join(", "),
        sets.join(", ")
    );
    (head, tail)
}

impl PgStore {
    async fn write_prepared(&self, p: &PreparedBatch) -> Result<(usize, usize), sqlx::Error> {
        let schema = p.schema;
        let (head, tail) = statement_head(p);
        let chunk = rows_per_statement(schema.columns.len());

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        let mut updated = 0;

        for rows in p.rows.chunks(chunk) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(head.as_str());
            qb.push_values(rows, |mut b, (_, row)| {
                for (v, col) in row.values().iter().zip(schema.columns) {
                    match col.ty {
                        ColumnType::Float => b.push_bind(v.as_f64()),
                        ColumnType::Date => b.push_bind(v.as_date()),
                        ColumnType::Text => b.push_bind(v.as_text().map(str::to_string)),
                    };
                }
            });
            qb.push(tail.as_str());

            // inserted = (xmax = 0): true on insert, false on update.
            let flags: Vec<bool> = qb.build_query_scalar().fetch_all(&mut *tx).await?;
            let ins = flags.iter().filter(|f| **f).count();
            inserted += ins;
            updated += flags.len() - ins;
            debug!(table = schema.name, rows = rows.len(), "upsert chunk written");
        }

        tx.commit().await?;
        Ok((inserted, updated))
    }
}

#[async_trait]
impl UpsertStore for PgStore {
    async fn upsert(
        &self,
        table: &str,
        batch: &CleanBatch,
        primary_key: &[&str],
    ) -> Result<UpsertOutcome, UpsertError> {
        let prepared = prepare_batch(table, batch, primary_key)?;
        if prepared.rows.is_empty() {
            warn!(table, "empty batch; nothing to upsert");
            return Ok(UpsertOutcome::noop(table));
        }
        let rows = prepared.rows.len();

        // Dropping the in-flight future drops the transaction, which rolls back.
        let res = tokio::time::timeout(self.timeout, self.write_prepared(&prepared)).await;
        let (inserted, updated) = match res {
            Err(_) => {
                return Err(UpsertError::Timeout {
                    table: table.to_string(),
                    rows,
                    after: self.timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(UpsertError::Transaction {
                    table: table.to_string(),
                    rows,
                    retryable: is_retryable_sqlx(&e),
                    message: e.to_string(),
                })
            }
            Ok(Ok(counts)) => counts,
        };

        info!(
            table,
            rows, inserted, updated,
            collapsed = prepared.collapsed,
            "upsert committed"
        );
        Ok(UpsertOutcome {
            table: table.to_string(),
            rows_affected: inserted + updated,
            inserted,
            updated,
            collapsed: prepared.collapsed,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests (no database)
// ---------------------------------------------------------------------------
