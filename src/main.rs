use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use listener_geocache::commands::{
    cache_stats, clear_invalid, forget_location, resolve_locations, run_batch_file,
};
use listener_geocache::{init_tracing, AppConfig, GeocodingContext, StatusUpdate};

#[derive(Parser)]
#[command(name = "geocache", version, about = "Cached geocoding for listener locations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one or more free-text locations
    Resolve {
        #[arg(required = true)]
        locations: Vec<String>,
        /// Maximum number of candidates requested from the provider
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Geocode a JSON array of `{"id": ..., "location": ...}` entries
    Batch { file: PathBuf },
    /// Count resolved and invalid cache entries
    Stats,
    /// Show configuration, database location and cache counts
    Health,
    /// Drop the cache entry for one location
    Forget { location: String },
    /// Drop every invalid (unresolvable) cache entry
    ClearInvalid,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let context = GeocodingContext::initialize(AppConfig::from_env())
        .context("failed to initialize geocoding context")?;

    match cli.command {
        Command::Resolve { locations, limit } => {
            let reports = resolve_locations(&context, &locations, limit).await;
            print_json(&reports)?;
        }
        Command::Batch { file } => {
            let observer = Arc::new(|update: StatusUpdate| {
                if let Ok(line) = serde_json::to_string(&update) {
                    println!("{line}");
                }
            });
            let stats = run_batch_file(&context, &file, observer)
                .await
                .with_context(|| format!("batch run over {} failed", file.display()))?;
            print_json(&json!({ "stats": stats }))?;
        }
        Command::Stats => print_json(&cache_stats(&context)?)?,
        Command::Health => print_json(&context.health()?)?,
        Command::Forget { location } => {
            let removed = forget_location(&context, &location)?;
            print_json(&json!({ "location": location, "removed": removed }))?;
        }
        Command::ClearInvalid => {
            let removed = clear_invalid(&context)?;
            print_json(&json!({ "removed": removed }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
