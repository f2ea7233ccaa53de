//! Configuration management for Tunesync

mod settings;

pub use settings::*;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunesync")
}

/// Get the configuration file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from the default location, writing the defaults on first run
pub fn load_or_create_default() -> Result<Settings> {
    let path = config_path();

    let mut settings = if path.exists() {
        read(&path)?
    } else {
        let settings = Settings::default();
        save(&settings)?;
        settings
    };

    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load configuration from an explicit path, which must exist
pub fn load_from(path: &Path) -> Result<Settings> {
    let mut settings = read(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Save configuration to file
pub fn save(settings: &Settings) -> Result<()> {
    let path = config_path();

    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(settings)?;
    fs::write(&path, content)?;

    Ok(())
}

fn read(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(settings)
}

/// Secrets and the database location may come from the environment instead of the file
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(id) = std::env::var("SPOTIFY_CLIENT_ID") {
        settings.spotify.client_id = id;
    }
    if let Ok(secret) = std::env::var("SPOTIFY_CLIENT_SECRET") {
        settings.spotify.client_secret = secret;
    }
    if let Ok(db) = std::env::var("TUNESYNC_DATABASE") {
        settings.database.path = PathBuf::from(db);
    }
}
