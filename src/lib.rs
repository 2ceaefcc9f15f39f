// CAF Crosswalk - Core Library
// MOSID → civilian NOC equivalencies and rank responsibilities.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod query;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use db::{
    CLEAR_ORDER, PopulateReport,
    setup_database, populate_database, populate_from_files,
    load_crosswalk_data, load_rank_entries,
    table_counts, store_fingerprint, list_mosid_codes, missing_mosids,
};
pub use error::CrosswalkError;
pub use models::{
    CrosswalkData, NocEquivalency, OccupationCode, OccupationData, RankEntry,
};
pub use normalizer::{
    MosidNocRecord, Field, ingest,
    read_records_csv, read_records_json,
};
pub use query::{
    Store,
    get_rank_data, get_occupation_data, get_occupation_data_batch,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
