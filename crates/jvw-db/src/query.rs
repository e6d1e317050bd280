//! Query side of [`PgStore`]: month-bucketed series, table ranges and
//! entity listings for the alignment engine.

use std::future::Future;

use async_trait::async_trait;
use chrono::NaiveDate;
use jvw_analytics::{MonthlySeries, Reducer, SeriesSource, SeriesSpec, SourceError};
use jvw_md::schema::{TableSchema, PERIOD_COLUMN};
use jvw_md::{Month, Window};
use tracing::debug;

use crate::upsert::is_retryable_sqlx;
use crate::PgStore;

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn source_err(e: sqlx::Error) -> SourceError {
    SourceError::Backend {
        retryable: is_retryable_sqlx(&e),
        message: e.to_string(),
    }
}

fn config_err(message: String) -> SourceError {
    SourceError::Backend {
        message,
        retryable: false,
    }
}

/// `select month, agg(value)` for one spec. Binds: `$1` window start
/// (inclusive), `$2` first day after the window, `$3` filter value.
pub(crate) fn series_sql(
    schema: &TableSchema,
    value_column: &str,
    filter_column: Option<&str>,
    reducer: Reducer,
) -> String {
    let col = quote(value_column);
    let period = quote(PERIOD_COLUMN);
    let agg = match reducer {
        Reducer::Last => format!("(array_agg({col} order by {period} desc))[1]"),
        other => format!("{}({col})", other.sql_aggregate()),
    };
    let mut sql = format!(
        "select date_trunc('month', {period})::date as month, {agg}::double precision as value \
         from {} where {period} >= $1 and {period} < $2 and {col} is not null",
        quote(schema.name)
    );
    if let Some(f) = filter_column {
        sql.push_str(&format!(" and {} = $3", quote(f)));
    }
    sql.push_str(" group by 1 order by 1");
    sql
}

impl PgStore {
    async fn bounded<T, F>(&self, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(SourceError::Timeout(self.timeout)),
            Ok(res) => res.map_err(source_err),
        }
    }
}

#[async_trait]
impl SeriesSource for PgStore {
    async fn load_series(
        &self,
        spec: &SeriesSpec,
        window: &Window,
    ) -> Result<MonthlySeries, SourceError> {
        let schema = TableSchema::lookup(&spec.table)
            .ok_or_else(|| config_err(format!("unknown table '{}'", spec.table)))?;
        let sql = series_sql(
            schema,
            &spec.value_column,
            spec.filter.as_ref().map(|f| f.column.as_str()),
            spec.reducer,
        );
        let after_end = window
            .end()
            .succ()
            .ok_or_else(|| config_err(format!("window {window} has no successor month")))?
            .first_day();

        let mut q = sqlx::query_as::<_, (NaiveDate, Option<f64>)>(&sql)
            .bind(window.start().first_day())
            .bind(after_end);
        if let Some(f) = &spec.filter {
            q = q.bind(f.value.clone());
        }
        let rows = self.bounded(q.fetch_all(&self.pool)).await?;
        debug!(label = %spec.label, table = schema.name, rows = rows.len(), "series loaded");

        let points = rows
            .into_iter()
            .filter_map(|(d, v)| v.filter(|x| x.is_finite()).map(|x| (Month::from_date(d), x)))
            .collect();
        Ok(MonthlySeries::new(spec.label.clone(), points))
    }

    async fn data_range(&self, table: &'static TableSchema) -> Result<Option<Window>, SourceError> {
        let period = quote(PERIOD_COLUMN);
        let sql = format!("select min({period}), max({period}) from {}", quote(table.name));
        let (lo, hi) = self
            .bounded(sqlx::query_as::<_, (Option<NaiveDate>, Option<NaiveDate>)>(&sql).fetch_one(&self.pool))
            .await?;
        match (lo, hi) {
            (Some(lo), Some(hi)) => Window::new(Month::from_date(lo), Month::from_date(hi))
                .map(Some)
                .map_err(|e| config_err(e.to_string())),
            _ => Ok(None),
        }
    }

    async fn distinct_entities(&self, table: &'static TableSchema) -> Result<Vec<String>, SourceError> {
        let Some(entity) = table.entity_column else {
            return Ok(Vec::new());
        };
        let col = quote(entity);
        let sql = format!("select distinct {col} from {} order by 1", quote(table.name));
        self.bounded(sqlx::query_scalar::<_, String>(&sql).fetch_all(&self.pool))
            .await
    }
}
