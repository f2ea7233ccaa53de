//! The external downloader

use crate::config::DownloaderSettings;
use crate::process;
use anyhow::Result;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;

/// Materializes tracks as local audio files. A returned error means the
/// tool failed for that URL; success says nothing about indexing.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch a single track
    async fn download_track(&self, url: &str) -> Result<()>;

    /// Fetch whatever is missing from an album or track, keeping existing files
    async fn sync_collection(&self, url: &str) -> Result<()>;
}

/// Runs spotDL
pub struct SpotdlDownloader {
    program: String,
    destination: PathBuf,
    extra_args: Vec<String>,
    sync_args: Vec<String>,
}

impl SpotdlDownloader {
    pub fn new(settings: &DownloaderSettings) -> Self {
        Self {
            program: settings.program.clone(),
            destination: settings.destination.clone(),
            extra_args: settings.extra_args.clone(),
            sync_args: settings.sync_args.clone(),
        }
    }

    fn args(&self, url: &str, bulk: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            url.into(),
            "--output".into(),
            self.destination.clone().into_os_string(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        if bulk {
            args.extend(self.sync_args.iter().map(OsString::from));
        }
        args
    }

    async fn run(&self, url: &str, bulk: bool) -> Result<()> {
        process::run_streamed(&self.program, self.args(url, bulk), &self.program).await?;
        Ok(())
    }
}

#[async_trait]
impl Downloader for SpotdlDownloader {
    async fn download_track(&self, url: &str) -> Result<()> {
        self.run(url, false).await
    }

    async fn sync_collection(&self, url: &str) -> Result<()> {
        self.run(url, true).await
    }
}
