use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jvw_md::universe::Target;
use jvw_md::Month;

mod commands;

#[derive(Parser)]
#[command(name = "jvw")]
#[command(about = "Jobs vs Wall Street: series ETL and dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Unemployment,
    Ces,
    Equities,
    All,
}

impl TargetArg {
    pub fn targets(self) -> Vec<Target> {
        match self {
            TargetArg::Unemployment => vec![Target::Unemployment],
            TargetArg::Ces => vec![Target::Ces],
            TargetArg::Equities => vec![Target::Equities],
            TargetArg::All => Target::ALL.to_vec(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and upsert. Tables run independently.
    Ingest {
        target: TargetArg,
        start_year: Option<i32>,
        end_year: Option<i32>,

        /// Merge into an in-memory store instead of Postgres.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Fetch and normalize into CSV staging files.
    Fetch {
        target: TargetArg,
        start_year: Option<i32>,
        end_year: Option<i32>,

        #[arg(long, default_value = "data")]
        out: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Upsert staged CSV files. Missing files are skipped.
    Load {
        #[arg(long, default_value = "data")]
        dir: PathBuf,

        /// Merge into an in-memory store instead of Postgres.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Jobs-vs-equities KPIs, correlations and indexed series for a window.
    Dashboard {
        /// First month (YYYY-MM); defaults to the start of the common data range.
        #[arg(long)]
        start: Option<Month>,

        /// Last month (YYYY-MM); defaults to the end of the common data range.
        #[arg(long)]
        end: Option<Month>,

        /// Sector ETF; defaults to the first one present.
        #[arg(long)]
        etf: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity and table presence.
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    // Also loads .env.local / .env.
    let cfg = jvw_config::AppConfig::from_env().context("invalid configuration")?;

    match cli.cmd {
        Commands::Ingest {
            target,
            start_year,
            end_year,
            dry_run,
            json,
        } => {
            let runs = commands::etl::ingest(&cfg, target.targets(), start_year, end_year, dry_run).await?;
            commands::finish_runs(&runs, json)?;
        }

        Commands::Fetch {
            target,
            start_year,
            end_year,
            out,
            json,
        } => {
            let runs = commands::etl::fetch(&cfg, target.targets(), start_year, end_year, &out).await?;
            commands::finish_runs(&runs, json)?;
        }

        Commands::Load { dir, dry_run, json } => {
            let runs = commands::etl::load(&cfg, &dir, dry_run).await?;
            commands::finish_runs(&runs, json)?;
        }

        Commands::Db { cmd } => {
            let pool = commands::connect_pool(&cfg).await?;
            let res = match cmd {
                DbCmd::Status => jvw_db::status(&pool).await.map(|s| {
                    println!("db_ok={} schema_ready={}", s.ok, s.schema_ready());
                    for (table, exists) in &s.tables {
                        println!("table={table} exists={exists}");
                    }
                }),
                DbCmd::Migrate => jvw_db::migrate(&pool).await.map(|()| {
                    println!("migrations_applied=true");
                }),
            };
            pool.close().await;
            res?;
        }

        Commands::Dashboard {
            start,
            end,
            etf,
            json,
        } => {
            let req = jvw_analytics::DashboardRequest { start, end, etf };
            commands::dashboard::run(&cfg, &req, json).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so `--json` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
