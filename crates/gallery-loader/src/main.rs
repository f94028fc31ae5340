//! Gallery Loader - numbered image gallery over a TTL disk cache
//!
//! Loads gallery images through the cancellable fetch pipeline and keeps
//! the cache directory purged by a durable periodic cleanup job.

mod commands;
mod error;
mod types;

use crate::error::Result;
use crate::types::GalleryConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gallery-loader")]
#[command(about = "Load gallery images through a TTL disk cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register the periodic cleanup and load images 1..=COUNT
    Load {
        #[arg(long, default_value = "20")]
        count: u32,

        /// Cancel every Nth request right after issuing it (0 disables)
        #[arg(long, default_value = "0")]
        cancel_every: u32,
    },
    /// Purge the cache directory now through a one-time job
    Purge,
    /// Print the job table as JSON
    Jobs,
    /// Run cleanup jobs until Ctrl-C
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("gallery_loader=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let config = load_config();
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache TTL: {} seconds", config.cache_ttl_secs);
    info!("Cleanup interval: {} seconds", config.cleanup_interval_secs);
    info!("Job table: {:?}", config.job_table_path);

    match cli.command {
        Command::Load {
            count,
            cancel_every,
        } => {
            commands::load(&config, count, cancel_every).await?;
        }
        Command::Purge => {
            commands::purge(&config).await?;
        }
        Command::Jobs => {
            println!("{}", commands::jobs(&config).await?);
        }
        Command::Daemon => {
            commands::daemon(&config).await?;
        }
    }

    Ok(())
}

fn load_config() -> GalleryConfig {
    let defaults = GalleryConfig::default();

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let cache_ttl_secs = std::env::var("CACHE_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.cache_ttl_secs);

    let cleanup_interval_secs = std::env::var("CLEANUP_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.cleanup_interval_secs);

    let job_table_path = std::env::var("JOB_TABLE_PATH")
        .map(PathBuf::from)
        .unwrap_or(defaults.job_table_path);

    let image_url_template =
        std::env::var("IMAGE_URL_TEMPLATE").unwrap_or(defaults.image_url_template);

    GalleryConfig {
        cache_dir,
        cache_ttl_secs,
        cleanup_interval_secs,
        job_table_path,
        image_url_template,
    }
}
