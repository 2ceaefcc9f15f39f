// ⚙️ Configuration shared by the CLI and the server
// Every setting is a flag with an environment fallback

use clap::Args;
use std::path::PathBuf;

/// Locations of the store and its canonical input documents
#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// SQLite store
    #[arg(long = "db", env = "CROSSWALK_DB", default_value = "mnet.db", global = true)]
    pub db_path: PathBuf,

    /// Crosswalk document keyed by "<code>: <title>"
    #[arg(
        long = "mnet-data",
        env = "CROSSWALK_MNET_DATA",
        default_value = "data/processed/mnet_data.json",
        global = true
    )]
    pub mnet_data: PathBuf,

    /// Rank responsibilities document (YAML or JSON)
    #[arg(
        long = "ranks",
        env = "CROSSWALK_RANKS",
        default_value = "data/rank_responsibilities.yaml",
        global = true
    )]
    pub ranks: PathBuf,
}

/// HTTP server settings
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[command(flatten)]
    pub store: StoreConfig,

    /// Listen address
    #[arg(long = "bind", env = "CROSSWALK_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Serve the existing store without repopulating it at startup
    #[arg(long = "skip-populate", env = "CROSSWALK_SKIP_POPULATE")]
    pub skip_populate: bool,
}

/// Normalizer input/output directories
#[derive(Debug, Clone, Args)]
pub struct NormalizeConfig {
    /// Directory of raw MOSID ↔ NOC tables
    #[arg(long = "raw-dir", env = "CROSSWALK_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Directory for the normalized outputs
    #[arg(long = "output-dir", env = "CROSSWALK_OUTPUT_DIR", default_value = "data/processed")]
    pub output_dir: PathBuf,
}
