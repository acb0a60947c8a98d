use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and maintain the shelf download cache.
///
/// The cache directory and size limit come from the configuration file and
/// `SHELF_` environment variables (e.g. `SHELF_CACHE__DIR`).
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace); `RUST_LOG` takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show entry count and disk usage
    Stats,
    /// List cached entries, most recently accessed first
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evict least-recently-accessed entries down to 80% of the size limit
    Cleanup,
    /// Remove cached artifacts of a file
    Invalidate {
        file_id: u64,
        /// Only this format (`original`, `kepub` or `plugin:<id>`); all formats if omitted
        #[arg(short, long)]
        format: Option<String>,
    },
}
