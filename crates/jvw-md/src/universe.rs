//! Default series universe and the provider-field -> table-column mapping
//! for each ingest target.

use crate::provider::RawRecord;
use crate::schema::{TableSchema, EQUITY_MONTHLY, HEADLINE_UNEMPLOYMENT, SECTOR_EMPLOYMENT};

/// U-3 unemployment rate, monthly, seasonally adjusted.
pub const HEADLINE_SERIES: &str = "LNS14000000";

/// CES supersector series (all employees, thousands, SA) and display names.
pub const CES_SUPERSECTORS: &[(&str, &str)] = &[
    ("CES0500000001", "Total Private"),
    ("CES1000000001", "Mining and Logging"),
    ("CES2000000001", "Construction"),
    ("CES3000000001", "Manufacturing"),
    ("CES4000000001", "Trade, Transportation, and Utilities"),
    ("CES4200000001", "Wholesale Trade"),
    ("CES4300000001", "Retail Trade"),
    ("CES4400000001", "Transportation and Warehousing"),
    ("CES4800000001", "Leisure and Hospitality"),
    ("CES5000000001", "Information"),
    ("CES5500000001", "Financial Activities"),
    ("CES6000000001", "Professional and Business Services"),
    ("CES7000000001", "Education and Health Services"),
    ("CES8000000001", "Other Services"),
    ("CES9000000001", "Government"),
];

/// Broad market index symbol as the equity provider spells it.
pub const INDEX_TICKER: &str = "^GSPC";

/// SPDR sector ETFs.
pub const SECTOR_ETFS: &[&str] = &[
    "XLB", "XLC", "XLE", "XLF", "XLI", "XLK", "XLP", "XLRE", "XLU", "XLV", "XLY",
];

/// Sector ETF shown when none is requested and it has data.
pub const DEFAULT_ETF: &str = "XLK";

/// ETF -> CES supersector name used to pick the employment series that sits
/// next to the ETF on the dashboard.
pub const ETF_TO_CES: &[(&str, &str)] = &[
    ("XLB", "Manufacturing"),
    ("XLC", "Information"),
    ("XLE", "Mining and Logging"),
    ("XLF", "Financial Activities"),
    ("XLI", "Manufacturing"),
    ("XLK", "Information"),
    ("XLP", "Retail Trade"),
    ("XLRE", "Construction"),
    ("XLU", "Trade, Transportation, and Utilities"),
    ("XLV", "Education and Health Services"),
    ("XLY", "Leisure and Hospitality"),
];

pub const DEFAULT_BLS_START_YEAR: i32 = 2000;
pub const DEFAULT_EQUITY_START_YEAR: i32 = 1999;

pub fn ces_series_ids() -> Vec<String> {
    CES_SUPERSECTORS.iter().map(|(id, _)| id.to_string()).collect()
}

pub fn ces_sector_name(series_id: &str) -> Option<&'static str> {
    CES_SUPERSECTORS
        .iter()
        .find(|(id, _)| *id == series_id)
        .map(|(_, name)| *name)
}

pub fn ces_sector_for_etf(etf: &str) -> Option<&'static str> {
    ETF_TO_CES
        .iter()
        .find(|(t, _)| t.eq_ignore_ascii_case(etf))
        .map(|(_, s)| *s)
}

/// Index plus every sector ETF.
pub fn default_tickers() -> Vec<String> {
    std::iter::once(INDEX_TICKER)
        .chain(SECTOR_ETFS.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Some stores drop the caret from the index symbol.
pub fn is_index_ticker(t: &str) -> bool {
    t == INDEX_TICKER || t == "GSPC"
}

// ---------------------------------------------------------------------------
// Ingest targets
// ---------------------------------------------------------------------------

/// One of the three tables the ETL knows how to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Unemployment,
    Ces,
    Equities,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Unemployment, Target::Ces, Target::Equities];

    pub fn schema(&self) -> &'static TableSchema {
        match self {
            Target::Unemployment => &HEADLINE_UNEMPLOYMENT,
            Target::Ces => &SECTOR_EMPLOYMENT,
            Target::Equities => &EQUITY_MONTHLY,
        }
    }

    pub fn series_ids(&self) -> Vec<String> {
        match self {
            Target::Unemployment => vec![HEADLINE_SERIES.to_string()],
            Target::Ces => ces_series_ids(),
            Target::Equities => default_tickers(),
        }
    }

    pub fn default_start_year(&self) -> i32 {
        match self {
            Target::Equities => DEFAULT_EQUITY_START_YEAR,
            Target::Unemployment | Target::Ces => DEFAULT_BLS_START_YEAR,
        }
    }

    /// Extra years fetched before the requested start. Equity returns need
    /// the previous close, so the first requested month gets its base from
    /// December of the year before; those rows are trimmed before load.
    pub fn lookback_years(&self) -> i32 {
        match self {
            Target::Equities => 1,
            Target::Unemployment | Target::Ces => 0,
        }
    }

    /// CSV staging file name.
    pub fn csv_name(&self) -> &'static str {
        match self {
            Target::Unemployment => "bls_unemployment.csv",
            Target::Ces => "bls_ces_supersectors.csv",
            Target::Equities => "equities_monthly.csv",
        }
    }

    /// Rename provider fields to this target's column names and attach the
    /// sector display name for CES rows.
    pub fn prepare(&self, records: &mut [RawRecord]) {
        match self {
            Target::Unemployment => {
                for r in records.iter_mut() {
                    r.rename_field("value", "unemployment_rate");
                }
            }
            Target::Ces => {
                for r in records.iter_mut() {
                    r.rename_field("value", "employment_thousands");
                    if r.field("sector_name").is_some() {
                        continue;
                    }
                    // Unknown codes keep the code as their display name.
                    if let Some(code) = r.entity_key.clone() {
                        let name = ces_sector_name(&code).map(str::to_string).unwrap_or(code);
                        r.fields.insert("sector_name".to_string(), name);
                    }
                }
            }
            Target::Equities => {}
        }
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unemployment" => Ok(Target::Unemployment),
            "ces" => Ok(Target::Ces),
            "equities" => Ok(Target::Equities),
            other => Err(format!("unknown target '{other}'")),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Target::Unemployment => "unemployment",
            Target::Ces => "ces",
            Target::Equities => "equities",
        })
    }
}
