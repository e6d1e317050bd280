//! jvw-md
//!
//! Series ingest for the jobs-vs-equities store: provider boundary, concrete
//! BLS and equity fetchers, the canonical monthly normalizer, batch quality
//! reporting and CSV staging.
//!
//! This crate does **not** write to the database; `jvw-db::etl` fetches and
//! normalizes through it, then upserts the resulting [`schema::CleanBatch`].

pub mod bls;
pub mod equities;
pub mod normalizer;
pub mod period;
pub mod provider;
pub mod quality;
pub mod schema;
pub mod staging;
pub mod universe;

pub use normalizer::{attach_monthly_returns, normalize, ParseError};
pub use period::{Month, PeriodError, Window};
pub use provider::{fetch_with_retry, FetchError, RawPeriod, RawRecord, RetryPolicy, SeriesFetcher};
pub use schema::{
    CleanBatch, ColumnDef, ColumnType, NormalizeReport, Row, TableSchema, Value,
    EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT, SECTOR_EMPLOYMENT,
};
