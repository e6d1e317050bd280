//! Test support: a scripted fetcher and fixture builders. The in-memory
//! store lives in `jvw-db` (dry runs use it) and is re-exported here.

pub mod fetcher;
pub mod fixtures;

pub use fetcher::StaticFetcher;
pub use jvw_db::MemoryStore;
