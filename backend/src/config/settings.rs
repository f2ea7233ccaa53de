//! Settings data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Queue and catalog database
    pub database: DatabaseSettings,

    /// External downloader invocation
    pub downloader: DownloaderSettings,

    /// Where playlists are written and how stored paths map to playback paths
    pub library: LibrarySettings,

    /// Cadence and retry ceilings of the reconciliation loop
    pub sync: SyncSettings,

    /// Metadata provider credentials
    pub spotify: SpotifySettings,

    /// Optional external indexer, run after downloads when the catalog is stale
    pub indexer: Option<IndexerSettings>,

    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: super::config_dir().join("tunesync.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    /// Executable to run, looked up on PATH
    pub program: String,

    /// Directory new audio files are written to
    pub destination: PathBuf,

    /// Arguments appended to every invocation
    pub extra_args: Vec<String>,

    /// Arguments appended only to bulk (album/track) syncs
    pub sync_args: Vec<String>,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        let destination = dirs::audio_dir().unwrap_or_else(|| PathBuf::from("./music"));

        Self {
            program: "spotdl".to_string(),
            destination,
            extra_args: vec!["--config".to_string(), "--no-cache".to_string()],
            sync_args: vec!["--sync-without-deleting".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// Root under which `Playlists/` is created
    pub playlists_root: PathBuf,

    /// Prefix of catalog paths as the indexer stored them
    pub storage_root: String,

    /// Prefix the playback server sees the same files under
    pub playback_root: String,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        let playlists_root = dirs::audio_dir().unwrap_or_else(|| PathBuf::from("./music"));

        Self {
            playlists_root,
            storage_root: "/mnt/music".to_string(),
            playback_root: "/music".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Pause before each download request, to go easy on the external services
    pub request_delay_secs: u64,

    /// Pause between two reconciliation cycles
    pub cycle_interval_secs: u64,

    /// Attempts after which a download request is given up
    pub max_sync_attempts: u32,

    /// Per-track failures after which the track is skipped for good
    pub max_failed_attempts: u32,

    /// Retries after which a playlist request is deactivated
    pub max_playlist_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_delay_secs: 300,
            cycle_interval_secs: 600,
            max_sync_attempts: 3,
            max_failed_attempts: 3,
            max_playlist_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub accounts_url: String,
}

impl Default for SpotifySettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: "https://api.spotify.com/v1".to_string(),
            accounts_url: "https://accounts.spotify.com/api/token".to_string(),
        }
    }
}

/// External indexer command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSettings {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
