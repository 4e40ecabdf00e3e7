//! Persistence for the watcher.
//!
//! - `DedupStore`: SQLite set of already-seen `(id, price)` pairs
//! - `export`: result files (CSV sheet, JSON array) named per run or per link
//!
//! ## Directory Structure
//!
//! ```text
//! database.db               # dedup store
//! result/
//! ├── result.csv            # single-file sheet
//! └── result.json           # optional JSON copy
//! storage/
//! ├── cookies.json          # local session cookies
//! └── cookies_external.json # purchased cookie identity
//! ```

mod dedup;
pub mod export;

pub use dedup::DedupStore;
pub use export::{
    CompositeResultStorage, NamingStrategy, ResultExporter, ResultStorage, build_result_storage,
};
