// ⚠️ Error taxonomy for the crosswalk store
//
// Not-found is NOT an error here: lookups return Option and the HTTP
// boundary turns None into a 404. Referential gaps during population are
// logged and counted in PopulateReport, never raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrosswalkError {
    /// A `"<code>: <title>"` key without the `": "` separator.
    /// Fatal for a population run.
    #[error("malformed MOSID key {key:?}: expected \"<code>: <title>\"")]
    MalformedKey { key: String },

    /// The SQLite store file could not be opened.
    #[error("storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement against an open store failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON document {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML document {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T, E = CrosswalkError> = std::result::Result<T, E>;
