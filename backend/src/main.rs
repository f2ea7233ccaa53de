//! Tunesync - keeps a local music library in step with Spotify
//!
//! Download requests are fetched track by track until every track is in the
//! catalog; playlist requests are turned into M3U files once their tracks
//! are indexed.

mod config;
mod db;
mod download;
mod indexer;
mod matching;
mod metadata;
mod orchestrator;
mod playlist;
mod policy;
mod process;

#[cfg(test)]
mod testing;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::db::Database;
use crate::download::SpotdlDownloader;
use crate::metadata::SpotifyClient;
use crate::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "tunesync", version, about = "Keeps a local music library in step with Spotify")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile on a timer until interrupted (the default)
    Run,
    /// Run a single cycle and exit
    Once,
    /// Queue a track, album or playlist URL for download
    Enqueue { url: String },
    /// Register a playlist to be written as an M3U file
    AddPlaylist {
        url: String,
        /// Never download the playlist's missing tracks
        #[arg(long)]
        no_pull: bool,
    },
    /// Record that the catalog has just been reindexed
    MarkIndexed,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load_or_create_default()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Tunesync v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded from {:?}",
        cli.config.clone().unwrap_or_else(config::config_path)
    );

    let db = Arc::new(Database::open(&settings.database.path)?);
    info!("Database opened at {:?}", settings.database.path);

    let metadata = Arc::new(SpotifyClient::new(&settings.spotify)?);
    let downloader = Arc::new(SpotdlDownloader::new(&settings.downloader));
    let orchestrator = Orchestrator::new(&settings, db, metadata, downloader);

    // Everything runs sequentially; one thread is plenty
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command.unwrap_or(Command::Run) {
            Command::Run => orchestrator.run().await,
            Command::Once => orchestrator.run_cycle().await,
            Command::Enqueue { url } => {
                if orchestrator.downloads().enqueue(&url).await?.is_none() {
                    info!("Nothing to do");
                }
                Ok(())
            }
            Command::AddPlaylist { url, no_pull } => {
                orchestrator.playlists().add_playlist(&url, no_pull)?;
                Ok(())
            }
            Command::MarkIndexed => orchestrator.gate().mark_indexed(Utc::now()),
        }
    })
}
