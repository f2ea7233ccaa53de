//! Hand-written fakes for the external collaborators

use crate::db::{CatalogStore, MusicFile, ObjectKind};
use crate::download::Downloader;
use crate::metadata::{MetadataError, MetadataProvider, PlaylistEntry, SpotifyRef, TrackInfo};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub fn track_info(id: &str, artists: &[&str], title: &str) -> TrackInfo {
    TrackInfo {
        id: id.to_string(),
        url: SpotifyRef::track_url(id),
        title: title.to_string(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
    }
}

/// Metadata provider serving canned answers. Unknown URLs are `NotFound`.
#[derive(Default)]
pub struct FakeMetadata {
    objects: HashMap<String, (ObjectKind, String)>,
    listings: HashMap<String, Vec<TrackInfo>>,
    playlists: HashMap<String, Vec<PlaylistEntry>>,
    failing: HashSet<String>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, url: &str, kind: ObjectKind, name: &str) -> Self {
        self.objects.insert(url.to_string(), (kind, name.to_string()));
        self
    }

    pub fn with_listing(mut self, url: &str, tracks: Vec<TrackInfo>) -> Self {
        self.listings.insert(url.to_string(), tracks);
        self
    }

    pub fn with_playlist(self, url: &str, name: &str, tracks: Vec<TrackInfo>) -> Self {
        let entries = tracks
            .into_iter()
            .map(|track| PlaylistEntry { track: Some(track) })
            .collect();
        self.with_playlist_entries(url, name, entries)
    }

    pub fn with_playlist_entries(mut self, url: &str, name: &str, entries: Vec<PlaylistEntry>) -> Self {
        let tracks = entries.iter().filter_map(|e| e.track.clone()).collect();
        self.playlists.insert(url.to_string(), entries);
        self.with_object(url, ObjectKind::Playlist, name)
            .with_listing(url, tracks)
    }

    /// Every call for this URL fails
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    fn check(&self, url: &str) -> Result<(), MetadataError> {
        if self.failing.contains(url) {
            return Err(MetadataError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn object(&self, url: &str) -> Result<&(ObjectKind, String), MetadataError> {
        self.check(url)?;
        self.objects
            .get(url)
            .ok_or_else(|| MetadataError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    async fn object_kind(&self, url: &str) -> Result<ObjectKind, MetadataError> {
        Ok(self.object(url)?.0)
    }

    async fn object_name(&self, url: &str) -> Result<String, MetadataError> {
        Ok(self.object(url)?.1.clone())
    }

    async fn track_listing(&self, url: &str) -> Result<Vec<TrackInfo>, MetadataError> {
        self.check(url)?;
        self.listings
            .get(url)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(url.to_string()))
    }

    async fn playlist_tracks(&self, url: &str) -> Result<Vec<PlaylistEntry>, MetadataError> {
        self.check(url)?;
        self.playlists
            .get(url)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(url.to_string()))
    }
}

/// Downloader that records its calls. A successful call can stand in for
/// the indexer by adding catalog entries.
#[derive(Default)]
pub struct FakeDownloader {
    catalog: Option<Arc<dyn CatalogStore>>,
    indexes: Mutex<HashMap<String, Vec<MusicFile>>>,
    failing: HashSet<String>,
    track_calls: Mutex<Vec<String>>,
    sync_calls: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexing(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Catalog entries that appear the first time `url` is downloaded
    pub fn indexes(mut self, url: &str, files: Vec<MusicFile>) -> Self {
        self.indexes.get_mut().insert(url.to_string(), files);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn track_calls(&self) -> Vec<String> {
        self.track_calls.lock().clone()
    }

    pub fn sync_calls(&self) -> Vec<String> {
        self.sync_calls.lock().clone()
    }

    fn complete(&self, url: &str) -> Result<()> {
        if self.failing.contains(url) {
            bail!("downloader exited with status 1 for {}", url);
        }
        let files = self.indexes.lock().remove(url);
        if let (Some(catalog), Some(files)) = (&self.catalog, files) {
            for file in &files {
                catalog.insert_music_file(file)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download_track(&self, url: &str) -> Result<()> {
        self.track_calls.lock().push(url.to_string());
        self.complete(url)
    }

    async fn sync_collection(&self, url: &str) -> Result<()> {
        self.sync_calls.lock().push(url.to_string());
        self.complete(url)
    }
}
