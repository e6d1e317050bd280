//! jvw-analytics
//!
//! Query side of the store: month alignment of persisted series, the
//! derived statistics computed over them, and the dashboard report.
//!
//! Storage backends plug in through [`engine::SeriesSource`]; this crate
//! never talks to a database directly.

pub mod align;
pub mod cache;
pub mod dashboard;
pub mod engine;
pub mod stats;

pub use align::{
    default_window, inner_join, outer_join, AlignedFrame, AlignedRow, MonthlySeries, OuterFrame,
    OuterRow, Reducer, SeriesFilter, SeriesSpec,
};
pub use dashboard::{build_dashboard, DashboardReport, DashboardRequest};
pub use engine::{AlignError, AlignmentEngine, SeriesSource, SourceError};
pub use stats::{LevelChange, Stat};
