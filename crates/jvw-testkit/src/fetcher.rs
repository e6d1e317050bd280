//! Canned [`SeriesFetcher`] with scripted failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use jvw_md::{FetchError, RawRecord, SeriesFetcher};

#[derive(Debug)]
pub struct StaticFetcher {
    name: &'static str,
    records: Vec<RawRecord>,
    failures: Mutex<VecDeque<FetchError>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(name: &'static str, records: Vec<RawRecord>) -> Self {
        Self {
            name,
            records,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// The first calls return these errors, in order, before any success.
    pub fn failing_first(self, errors: Vec<FetchError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..self
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeriesFetcher for StaticFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    /// Records whose entity key is in `series_ids` (or that have none) and
    /// whose period year, when parseable, is in range.
    async fn fetch(
        &self,
        series_ids: &[String],
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if let Some(e) = next {
            return Err(e);
        }

        Ok(self
            .records
            .iter()
            .filter(|r| match &r.entity_key {
                Some(k) => series_ids.iter().any(|id| id == k),
                None => true,
            })
            .filter(|r| match record_year(r) {
                Some(y) => (start_year..=end_year).contains(&y),
                None => true,
            })
            .cloned()
            .collect())
    }
}

fn record_year(r: &RawRecord) -> Option<i32> {
    match &r.period {
        jvw_md::RawPeriod::YearPeriod { year, .. } => year.trim().parse().ok(),
        jvw_md::RawPeriod::Date(s) => s.get(..4).and_then(|y| y.parse().ok()),
    }
}
