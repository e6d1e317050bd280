//! Alignment engine: validates specs, loads series from a [`SeriesSource`],
//! joins them, and caches loaded series for a bounded TTL.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use jvw_md::schema::TableSchema;
use jvw_md::Window;
use thiserror::Error;
use tracing::{debug, warn};

use crate::align::{inner_join, outer_join, AlignedFrame, MonthlySeries, OuterFrame, SeriesSpec};
use crate::cache::TtlCache;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure inside a series backend (database, in-memory store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("series query timed out after {0:?}")]
    Timeout(Duration),
    #[error("series backend error: {message}")]
    Backend { message: String, retryable: bool },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Timeout(_) => true,
            SourceError::Backend { retryable, .. } => *retryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignError {
    /// Bad spec or table name; nothing was queried.
    #[error("alignment config error: {0}")]
    Config(String),
    #[error(transparent)]
    Source(#[from] SourceError),
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Read side of the series store.
///
/// Implementations receive specs that already passed
/// [`SeriesSpec::validate`].
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Rows of `spec.table` with `period_date` in `window`, filtered,
    /// grouped by month and reduced with `spec.reducer`. Nulls are ignored.
    async fn load_series(
        &self,
        spec: &SeriesSpec,
        window: &Window,
    ) -> Result<MonthlySeries, SourceError>;

    /// First and last month present in `table`; `None` when empty.
    async fn data_range(&self, table: &'static TableSchema) -> Result<Option<Window>, SourceError>;

    /// Distinct values of the table's entity column, sorted.
    async fn distinct_entities(
        &self,
        table: &'static TableSchema,
    ) -> Result<Vec<String>, SourceError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type CacheKey = (Window, Vec<SeriesSpec>);

pub struct AlignmentEngine<S> {
    source: S,
    cache: Mutex<TtlCache<CacheKey, Vec<MonthlySeries>>>,
}

impl<S: SeriesSource> AlignmentEngine<S> {
    /// `cache_ttl` of zero disables caching.
    pub fn new(source: S, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: Mutex::new(TtlCache::new(cache_ttl)),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Inner join of `specs` over `window`, served from cache when fresh.
    pub async fn align(
        &self,
        window: Window,
        specs: &[SeriesSpec],
    ) -> Result<AlignedFrame, AlignError> {
        let series = self.load(window, specs, true).await?;
        Ok(inner_join(window, &series))
    }

    /// Same as [`align`](Self::align) but always queries the source.
    pub async fn align_fresh(
        &self,
        window: Window,
        specs: &[SeriesSpec],
    ) -> Result<AlignedFrame, AlignError> {
        let series = self.load(window, specs, false).await?;
        Ok(inner_join(window, &series))
    }

    pub async fn align_outer(
        &self,
        window: Window,
        specs: &[SeriesSpec],
    ) -> Result<OuterFrame, AlignError> {
        let series = self.load(window, specs, true).await?;
        Ok(outer_join(window, &series))
    }

    /// Load every spec, each restricted to `window`.
    pub async fn load(
        &self,
        window: Window,
        specs: &[SeriesSpec],
        use_cache: bool,
    ) -> Result<Vec<MonthlySeries>, AlignError> {
        if specs.is_empty() {
            return Err(AlignError::Config("no series requested".to_string()));
        }
        for (i, s) in specs.iter().enumerate() {
            s.validate()?;
            if specs[..i].iter().any(|p| p.label == s.label) {
                return Err(AlignError::Config(format!(
                    "duplicate series label '{}'",
                    s.label
                )));
            }
        }

        let key: CacheKey = (window, specs.to_vec());
        if use_cache {
            if let Some(hit) = self.lock_cache().get(&key) {
                debug!(window = %window, series = specs.len(), "alignment cache hit");
                return Ok(hit);
            }
        }

        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            let s = self.source.load_series(spec, &window).await?;
            if s.is_empty() {
                warn!(label = %spec.label, table = %spec.table, window = %window, "series empty in window");
            }
            out.push(s);
        }

        self.lock_cache().insert(key, out.clone());
        Ok(out)
    }

    pub async fn data_range(&self, table: &str) -> Result<Option<Window>, AlignError> {
        let schema = TableSchema::lookup(table)
            .ok_or_else(|| AlignError::Config(format!("unknown table '{table}'")))?;
        Ok(self.source.data_range(schema).await?)
    }

    /// Intersection of the ranges of `tables`; `None` if any table is empty
    /// or the ranges do not overlap.
    pub async fn default_window(&self, tables: &[&str]) -> Result<Option<Window>, AlignError> {
        let mut ranges = Vec::with_capacity(tables.len());
        for t in tables {
            match self.data_range(t).await? {
                Some(r) => ranges.push(r),
                None => {
                    warn!(table = %t, "table has no rows");
                    return Ok(None);
                }
            }
        }
        Ok(crate::align::default_window(&ranges))
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache<CacheKey, Vec<MonthlySeries>>> {
        // A poisoned cache is still a valid cache.
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}
