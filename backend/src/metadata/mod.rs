//! Metadata provider: what a source URL is and which tracks it contains

mod spotify;

pub use spotify::SpotifyClient;
#[cfg(test)]
pub use spotify::SpotifyRef;

use crate::db::{ObjectKind, TrackProgress};
use crate::matching;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a metadata provider
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not a recognised source URL: {0}")]
    InvalidUrl(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} URLs are not supported here")]
    Unsupported(ObjectKind),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

/// One track as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    /// Empty for tracks the provider cannot link to (local files)
    pub url: String,
    pub title: String,
    /// Credited artists in order
    pub artists: Vec<String>,
}

impl TrackInfo {
    pub fn artist_credit(&self) -> String {
        matching::join_artists(&self.artists)
    }

    /// First credited artist, taken from the list rather than the joined credit
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }

    /// "Artist, Other - Title"
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist_credit(), self.title)
    }

    pub fn to_progress(&self) -> TrackProgress {
        TrackProgress::new(self.artist_credit(), self.title.clone(), self.url.clone())
    }
}

/// A playlist slot. Upstream data sometimes carries no track at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub track: Option<TrackInfo>,
}

/// Expected track count plus a progress snapshot for every track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackListing {
    pub expected_count: u32,
    pub tracks: Vec<TrackProgress>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn object_kind(&self, url: &str) -> Result<ObjectKind, MetadataError>;

    /// Display name of the track, album or playlist
    async fn object_name(&self, url: &str) -> Result<String, MetadataError>;

    /// Every track behind the URL, in order
    async fn track_listing(&self, url: &str) -> Result<Vec<TrackInfo>, MetadataError>;

    /// Playlist slots in playlist order
    async fn playlist_tracks(&self, url: &str) -> Result<Vec<PlaylistEntry>, MetadataError>;

    async fn expected_tracks(&self, url: &str) -> Result<TrackListing, MetadataError> {
        let tracks: Vec<TrackProgress> = self
            .track_listing(url)
            .await?
            .iter()
            .map(TrackInfo::to_progress)
            .collect();

        Ok(TrackListing {
            expected_count: tracks.len() as u32,
            tracks,
        })
    }
}
