//! CSV staging for normalized batches.
//!
//! `fetch` writes one CSV per table; `load` reads them back as raw records
//! and sends them through the same normalizer as a live fetch, so a staged
//! file edited by hand is validated exactly like provider data.
//!
//! ## Column contract (case-insensitive, order-independent)
//!
//! Header names are the table's column names. `period_date` is required,
//! plus the entity column for keyed tables. Unknown columns are ignored;
//! missing value columns surface as per-record drops in the normalizer.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::ByteRecord;
use thiserror::Error;

use crate::normalizer::{DroppedRecord, ParseError};
use crate::provider::{RawPeriod, RawRecord};
use crate::schema::{CleanBatch, TableSchema, PERIOD_COLUMN};

#[derive(Debug, Error)]
pub enum StagingError {
    /// The staging file does not exist; callers skip the table.
    #[error("staging file not found: {0}")]
    NotFound(PathBuf),
    #[error("staging io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv missing required header column '{0}'")]
    MissingHeader(&'static str),
}

/// Write `batch` as CSV with a header of schema column names.
pub fn write_batch_csv(path: &Path, batch: &CleanBatch) -> Result<(), StagingError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StagingError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(batch.schema.columns.iter().map(|c| c.name))?;
    for row in &batch.rows {
        w.write_record(row.values().iter().map(|v| v.render()))?;
    }
    w.flush().map_err(|source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Read a staged CSV for `schema` into raw records.
/// Records read back from a staging file.
///
/// Rows the CSV layer cannot decode (wrong field count, invalid UTF-8) are
/// kept as drops so the rest of the file still loads. Their `index` is the
/// data-row number in the file.
#[derive(Debug, Default)]
pub struct StagedRecords {
    pub records: Vec<RawRecord>,
    pub malformed: Vec<DroppedRecord>,
}

pub fn read_raw_csv(path: &Path, schema: &TableSchema) -> Result<StagedRecords, StagingError> {
    if !path.exists() {
        return Err(StagingError::NotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path).map_err(|source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_raw_csv_from_reader(file, schema)
}

pub fn read_raw_csv_from_reader<R: Read>(
    reader: R,
    schema: &TableSchema,
) -> Result<StagedRecords, StagingError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    // Lowercased header -> column index.
    let header_map: HashMap<String, usize> = rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_ascii_lowercase(), i))
        .collect();
    let width = rdr.byte_headers()?.len();

    let period_i = *header_map
        .get(PERIOD_COLUMN)
        .ok_or(StagingError::MissingHeader(PERIOD_COLUMN))?;
    let entity_i = match schema.entity_column {
        Some(e) => Some(*header_map.get(e).ok_or(StagingError::MissingHeader(e))?),
        None => None,
    };
    let value_cols: Vec<(&'static str, usize)> = schema
        .columns
        .iter()
        .filter(|c| c.name != PERIOD_COLUMN && Some(c.name) != schema.entity_column)
        .filter_map(|c| header_map.get(c.name).map(|i| (c.name, *i)))
        .collect();
    let layout = Layout {
        width,
        period_i,
        entity_i,
        value_cols,
    };

    let mut out = StagedRecords::default();
    let mut rec = ByteRecord::new();
    let mut index = 0;
    loop {
        let decoded = match rdr.read_byte_record(&mut rec) {
            Ok(false) => break,
            Ok(true) => layout.decode(&rec),
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => Err(ParseError::MalformedRow(e.to_string())),
        };
        match decoded {
            Ok(raw) => out.records.push(raw),
            Err(error) => out.malformed.push(DroppedRecord { index, error }),
        }
        index += 1;
    }
    Ok(out)
}

struct Layout {
    width: usize,
    period_i: usize,
    entity_i: Option<usize>,
    value_cols: Vec<(&'static str, usize)>,
}

impl Layout {
    fn decode(&self, rec: &ByteRecord) -> Result<RawRecord, ParseError> {
        if rec.len() != self.width {
            return Err(ParseError::MalformedRow(format!(
                "expected {} fields, found {}",
                self.width,
                rec.len()
            )));
        }
        let period = RawPeriod::Date(field(rec, self.period_i)?.unwrap_or_default().to_string());
        let entity = match self.entity_i {
            Some(i) => field(rec, i)?.map(str::to_string),
            None => None,
        };
        let mut raw = RawRecord::new(entity, period);
        for (name, i) in &self.value_cols {
            if let Some(v) = field(rec, *i)? {
                raw.fields.insert((*name).to_string(), v.to_string());
            }
        }
        Ok(raw)
    }
}

fn field(rec: &ByteRecord, i: usize) -> Result<Option<&str>, ParseError> {
    rec.get(i)
        .map(std::str::from_utf8)
        .transpose()
        .map_err(|e| ParseError::MalformedRow(format!("field {}: {e}", i + 1)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
