use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use cinema_pipeline::config::{Config, DEFAULT_CONFIG_PATH};
use cinema_pipeline::context::Services;
use cinema_pipeline::domain::RawScreening;
use cinema_pipeline::observability;
use cinema_pipeline::server::{start_server, AppState};

#[derive(Parser)]
#[command(name = "cinema_pipeline")]
#[command(about = "Cinema listing pipeline: title extraction, festival tagging, duplicate merging and source health")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest scraped listings (JSON array or JSON lines)
    Ingest {
        /// Listings file; reads stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Merge duplicate films that have upcoming screenings
    Dedupe,
    /// Score every active venue's scraper health
    Health {
        /// Keep running, re-scoring every N minutes
        #[arg(long)]
        every_minutes: Option<u64>,
    },
    /// Re-run festival detection over stored screenings
    Rescan {
        /// Only rescan this venue
        #[arg(long)]
        venue: Option<String>,
        /// Clear and re-detect a single festival, e.g. frightfest-2026
        #[arg(long, conflicts_with = "venue")]
        festival: Option<String>,
    },
    /// Serve the health dashboard API and Prometheus metrics
    Serve,
}

fn read_listings(input: Option<&PathBuf>) -> Result<Vec<RawScreening>> {
    let content = match input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    parse_listings(&content)
}

/// Accepts either a JSON array or one JSON object per line.
fn parse_listings(content: &str) -> Result<Vec<RawScreening>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).context("listings must be a JSON array of screenings");
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("invalid listing on line {}", n + 1)))
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    observability::init_logging(&config.logging.dir);
    if let Err(e) = observability::init_metrics() {
        error!("Metrics disabled: {}", e);
    }

    let services = Services::open(&config).await?;

    match cli.command {
        Commands::Ingest { input } => {
            let listings = read_listings(input.as_ref())?;
            info!("Read {} listing(s)", listings.len());
            let report = services.ingest.ingest_batch(&listings, Utc::now()).await?;
            print_json(&report)?;
        }
        Commands::Dedupe => {
            let report = services.dedupe.sweep(Utc::now()).await?;
            print_json(&report)?;
        }
        Commands::Health { every_minutes } => match every_minutes {
            None => {
                let snapshots = services.health.run(Utc::now()).await?;
                print_json(&snapshots)?;
            }
            Some(minutes) => {
                let _heartbeat = observability::spawn_heartbeat(observability::HEARTBEAT_INTERVAL);
                let mut ticker = tokio::time::interval(Duration::from_secs(minutes.max(1) * 60));
                loop {
                    ticker.tick().await;
                    if let Err(e) = services.health.run(Utc::now()).await {
                        error!("Health check failed: {:#}", e);
                    }
                }
            }
        },
        Commands::Rescan { venue, festival } => {
            let report = match festival {
                Some(slug) => services.festival.reverse_tag(&slug).await?,
                None => services.festival.rescan(venue.as_deref(), Utc::now()).await?,
            };
            print_json(&report)?;
        }
        Commands::Serve => {
            let _heartbeat = observability::spawn_heartbeat(observability::HEARTBEAT_INTERVAL);
            let state = AppState {
                health: services.health.clone(),
            };
            start_server(state, &config.server.bind).await?;
        }
    }

    Ok(())
}
