//! `shelf` - administrative CLI for the download cache.

mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use bytesize::ByteSize;
use clap::Parser;
use exn::ResultExt;
use shelf_cache::{CacheFormat, CacheManager, GeneratorRegistry};
use shelf_config::Config;
use std::process::ExitCode;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(dir = %config.cache.dir.display(), max_size_bytes = config.cache.max_size_bytes, "opening cache");
    // Administrative commands never generate, so the built-in registry is enough.
    let cache = CacheManager::new(&config.cache.dir, config.cache.max_size_bytes, GeneratorRegistry::with_passthrough())
        .or_raise(|| ErrorKind::Cache)?;

    match cli.command {
        Command::Stats => stats(&cache).await,
        Command::List { json } => list(&cache, json).await,
        Command::Cleanup => {
            let stats = cache.trigger_cleanup().await;
            if stats.skipped {
                println!("Another cleanup is in progress; nothing done.");
            } else {
                println!(
                    "Removed {} entries ({}); {} -> {}",
                    stats.files_removed,
                    ByteSize::b(stats.bytes_removed),
                    ByteSize::b(stats.size_before),
                    ByteSize::b(stats.size_after),
                );
            }
            Ok(())
        },
        Command::Invalidate { file_id, format: None } => {
            let removed = cache.invalidate_file(file_id).await.or_raise(|| ErrorKind::Cache)?;
            println!("Removed {removed} entries for file {file_id}");
            Ok(())
        },
        Command::Invalidate { file_id, format: Some(format) } => {
            let format: CacheFormat = format.parse::<CacheFormat>().or_raise(|| ErrorKind::InvalidArgument(format.clone()))?;
            cache.invalidate_format(file_id, &format).await.or_raise(|| ErrorKind::Cache)?;
            println!("Removed {format} entry for file {file_id}");
            Ok(())
        },
    }
}

async fn stats(cache: &CacheManager) -> Result<()> {
    let stats = cache.stats().await.or_raise(|| ErrorKind::Cache)?;
    println!("Directory: {}", cache.dir().display());
    println!("Entries:   {}", stats.entries);
    println!("Size:      {}", usage(stats.total_size, cache.max_size_bytes()));
    Ok(())
}

async fn list(cache: &CacheManager, json: bool) -> Result<()> {
    let mut entries = cache.entries().await.or_raise(|| ErrorKind::Cache)?;
    entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
    if json {
        println!("{}", serde_json::to_string_pretty(&entries).or_raise(|| ErrorKind::Output)?);
        return Ok(());
    }
    println!("{:>10}  {:<16}  {:>10}  {:<25}  ARTIFACT", "FILE", "FORMAT", "SIZE", "LAST ACCESSED");
    for entry in &entries {
        let accessed = entry.last_accessed_at.format(&Rfc3339).or_raise(|| ErrorKind::Output)?;
        println!(
            "{:>10}  {:<16}  {:>10}  {:<25}  {}",
            entry.file_id,
            entry.format.to_string(),
            ByteSize::b(entry.file_size).to_string(),
            accessed,
            entry.artifact
        );
    }
    Ok(())
}

fn usage(total: u64, max: u64) -> String {
    match max {
        0 => format!("{} (no limit)", ByteSize::b(total)),
        max => format!("{} of {} ({:.1}%)", ByteSize::b(total), ByteSize::b(max), total as f64 * 100.0 / max as f64),
    }
}
