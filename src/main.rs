use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use caf_crosswalk::config::{NormalizeConfig, StoreConfig};
use caf_crosswalk::logging::{init_logging, level_from_verbosity, LogFormat};
use caf_crosswalk::{
    ingest, missing_mosids, populate_from_files, store_fingerprint, table_counts, Store,
};

#[derive(Parser)]
#[command(
    name = "caf-crosswalk",
    version,
    about = "Maintenance jobs and lookups for the MOSID ↔ NOC crosswalk store"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    store: StoreConfig,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "pretty", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize raw MOSID ↔ NOC tables into mosid_noc.csv / mosid_noc.json
    Normalize(NormalizeConfig),

    /// Create the schema and repopulate the store from the canonical documents
    Populate,

    /// Responsibilities for a rank
    Rank { name: String },

    /// Civilian equivalencies for one MOSID code
    Mosid { code: String },

    /// Civilian equivalencies for several MOSID codes
    Batch {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Row counts and content fingerprint of the store
    Stats,

    /// List MOSID codes from a file (one "<code>: <title>" or code per line)
    /// that are missing from the store
    Verify {
        #[arg(long, value_name = "FILE")]
        expected: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(level_from_verbosity(cli.verbose, cli.quiet), cli.log_format)?;

    let store = Store::new(&cli.store.db_path);

    match cli.command {
        Command::Normalize(paths) => run_normalize(&paths),
        Command::Populate => run_populate(&store, &cli.store),
        Command::Rank { name } => match store.rank(&name)? {
            Some(rank) => print_json(&rank),
            None => not_found(&format!("Rank {name}")),
        },
        Command::Mosid { code } => match store.occupation(&code)? {
            Some(data) => print_json(&data),
            None => not_found(&format!("MOSID code {code}")),
        },
        Command::Batch { codes } => print_json(&store.occupation_batch(&codes)?),
        Command::Stats => run_stats(&store),
        Command::Verify { expected } => run_verify(&store, &expected),
    }
}

fn run_normalize(paths: &NormalizeConfig) -> Result<()> {
    println!("🧹 Normalizing crosswalk tables from {}", paths.raw_dir.display());

    let records = ingest(&paths.raw_dir, &paths.output_dir)?;

    println!(
        "✓ Wrote {} records to {}",
        records.len(),
        paths.output_dir.display()
    );
    Ok(())
}

fn run_populate(store: &Store, config: &StoreConfig) -> Result<()> {
    println!("🗄️  Populating {}", store.path().display());

    let conn = store.open_writer()?;
    let report = populate_from_files(&conn, &config.mnet_data, &config.ranks)?;

    println!("✓ MOSIDs:            {}", report.mosids);
    println!("✓ Equivalencies:     {}", report.equivalencies);
    println!("✓ Task statements:   {}", report.task_statements);
    println!("✓ Ranks:             {}", report.ranks);
    println!("✓ Responsibilities:  {}", report.responsibilities);
    if report.skipped_equivalencies > 0 {
        println!("⚠️  Skipped equivalencies: {}", report.skipped_equivalencies);
    }
    Ok(())
}

fn run_stats(store: &Store) -> Result<()> {
    let conn = store.connect()?;

    println!("📊 {}", store.path().display());
    for (table, count) in table_counts(&conn)? {
        println!("   {table:<22} {count}");
    }
    println!("   fingerprint            {}", store_fingerprint(&conn)?);
    Ok(())
}

fn run_verify(store: &Store, expected: &Path) -> Result<()> {
    let content = fs::read_to_string(expected)
        .with_context(|| format!("Failed to read {}", expected.display()))?;

    let conn = store.connect()?;
    let missing = missing_mosids(&conn, content.lines())?;

    if missing.is_empty() {
        println!("✅ The store contains every listed MOSID.");
    } else {
        println!("Found {} missing MOSIDs in the store:", missing.len());
        for code in &missing {
            println!("  - {code}");
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn not_found(what: &str) -> Result<()> {
    eprintln!("❌ {what} is not present in the CAF Resume Helper dataset.");
    std::process::exit(1);
}
