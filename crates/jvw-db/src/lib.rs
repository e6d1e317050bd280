//! jvw-db
//!
//! Postgres persistence for the monthly series tables: connection setup,
//! embedded migrations, the idempotent batch upsert, the per-table load
//! pipeline and the query side used by the alignment engine.

pub mod etl;
pub mod memory;
pub mod query;
pub mod upsert;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use jvw_config::{DbConfig, DbTarget, SslMode};
use jvw_md::schema::ALL_TABLES;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

pub use etl::{LoadOutcome, Stage, TableRun, YearRange};
pub use memory::MemoryStore;
pub use upsert::{prepare_batch, PreparedBatch, UpsertError, UpsertOutcome, UpsertStore};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Connection options for `cfg`. An explicit `sslmode=` in the URL wins.
pub fn connect_options(cfg: &DbConfig) -> Result<PgConnectOptions> {
    let opts = match &cfg.target {
        DbTarget::Url(url) => {
            let opts = PgConnectOptions::from_str(url).context("invalid DATABASE_URL")?;
            if cfg.url_sets_sslmode() {
                opts
            } else {
                opts.ssl_mode(pg_ssl_mode(cfg.ssl_mode))
            }
        }
        DbTarget::Params {
            host,
            port,
            database,
            user,
            password,
        } => PgConnectOptions::new()
            .host(host)
            .port(*port)
            .database(database)
            .username(user)
            .password(password)
            .ssl_mode(pg_ssl_mode(cfg.ssl_mode)),
    };
    Ok(opts)
}

/// Connect a small pool; `acquire_timeout` bounds every checkout.
pub async fn connect(cfg: &DbConfig, acquire_timeout: Duration) -> Result<PgPool> {
    let opts = connect_options(cfg)?;
    let pool = PgPoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .acquire_timeout(acquire_timeout)
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to connect to Postgres at {}", cfg.describe()))?;
    info!(db = %cfg.describe(), "connected to Postgres");
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    /// `(table, exists)` for every series table.
    pub tables: Vec<(String, bool)>,
}

impl DbStatus {
    pub fn schema_ready(&self) -> bool {
        self.ok && self.tables.iter().all(|(_, exists)| *exists)
    }
}

/// Connectivity plus presence of each series table.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let mut tables = Vec::with_capacity(ALL_TABLES.len());
    for t in ALL_TABLES {
        let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            r#"
            select exists (
                select 1
                from information_schema.tables
                where table_schema = 'public' and table_name = $1
            )
            "#,
        )
        .bind(t.name)
        .fetch_one(pool)
        .await
        .with_context(|| format!("status table-exists query failed for {}", t.name))?;
        tables.push((t.name.to_string(), exists));
    }

    Ok(DbStatus {
        ok: one == 1,
        tables,
    })
}

/// Pool plus the per-operation deadline used by upserts and series queries.
#[derive(Debug, Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
    pub(crate) timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
