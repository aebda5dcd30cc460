//! Strata - Tiered cache engine command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;
use strata_core::CacheManager;
use strata_db::utils::format_bytes;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LogFormat, LoggingConfig};

/// Strata - Tiered cache with expiry, tags and promotion
///
/// Without `persistent_path` configured the persistent tier lives only for
/// the duration of one command; the durable tier is shared between runs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "STRATA_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a JSON value under a key
    Set {
        key: String,
        /// Value as JSON, e.g. '{"x": 1}'
        json: String,
        /// Time to live in seconds (configured default when omitted)
        #[arg(long)]
        ttl_secs: Option<u64>,
        /// Tag to attach; repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Delete a key from every tier
    Delete { key: String },
    /// Delete every entry carrying any of the given tags
    ClearTags {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Wipe every tier
    Clear,
    /// Print cache statistics
    Stats,
    /// Purge expired entries once
    Sweep,
    /// Keep the cleanup scheduler running until Ctrl-C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging, args.log_level.as_deref());

    info!("Starting Strata v{}", env!("CARGO_PKG_VERSION"));

    // Create data directories
    if let Some(dir) = config.durable_data_dir() {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    }

    let cache = CacheManager::open(config.cache)
        .await
        .context("Failed to open cache")?;

    let result = execute(&cache, args.command).await;
    cache.shutdown().await;
    result
}

async fn execute(cache: &CacheManager, command: Command) -> Result<()> {
    match command {
        Command::Get { key } => match cache.get::<Value>(&key).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(not found)"),
        },
        Command::Set {
            key,
            json,
            ttl_secs,
            tags,
        } => {
            let value: Value = serde_json::from_str(&json)
                .with_context(|| format!("Invalid JSON value for {}", key))?;
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            cache
                .set(&key, &value, ttl_secs.map(Duration::from_secs), &tags)
                .await;
            println!("OK");
        }
        Command::Delete { key } => {
            cache.delete(&key).await;
            println!("OK");
        }
        Command::ClearTags { tags } => {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            let removed = cache.clear_by_tags(&tags).await;
            println!("Removed {} entries", removed);
        }
        Command::Clear => {
            cache.clear().await;
            println!("OK");
        }
        Command::Stats => {
            let stats = cache.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if let Some(durable) = cache.durable_stats().await {
                println!(
                    "durable: {} entries, {}, {} tags",
                    durable.entry_count,
                    format_bytes(u64::try_from(durable.total_size).unwrap_or_default()),
                    durable.tag_count
                );
            }
        }
        Command::Sweep => {
            let removed = cache.purge_expired().await;
            println!("Removed {} expired entries", removed);
        }
        Command::Run => {
            info!(
                "Cleanup running every {}s; press Ctrl-C to stop",
                cache.config().cleanup_interval_secs
            );
            shutdown_signal().await;
        }
    }
    Ok(())
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over both the command line and the file.
fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
