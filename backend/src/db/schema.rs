//! Database schema types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of object a source URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Track,
    Album,
    Playlist,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one expected track inside a download request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackProgress {
    /// Credited artists, joined with ", "
    pub artist: String,
    pub title: String,
    /// URL of the individual track, empty when the provider had none
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub found: bool,
    /// Terminal: a skipped track is never attempted again
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub failed_attempts: u32,
}

impl TrackProgress {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            source_url: source_url.into(),
            ..Default::default()
        }
    }
}

/// A queued intent to materialize a track, album or playlist as local files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    pub source_url: String,
    pub name: String,
    /// Unknown until the metadata provider has been asked
    pub kind: Option<ObjectKind>,
    pub active: bool,
    pub errored: bool,
    pub sync_count: u32,
    pub retry_count: u32,
    /// 0 while unknown
    pub expected_track_count: u32,
    pub found_track_count: u32,
    pub track_metadata: Vec<TrackProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRequest {
    /// Create a new active download request
    pub fn new(source_url: impl Into<String>, name: impl Into<String>, kind: Option<ObjectKind>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            name: name.into(),
            kind,
            active: true,
            errored: false,
            sync_count: 0,
            retry_count: 0,
            expected_track_count: 0,
            found_track_count: 0,
            track_metadata: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A queued intent to produce a playlist file from already materialized tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRequest {
    pub id: String,
    pub source_url: String,
    /// Never queue downloads for the tracks this playlist is missing
    pub no_pull: bool,
    pub active: bool,
    pub errored: bool,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl PlaylistRequest {
    pub fn new(source_url: impl Into<String>, no_pull: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            no_pull,
            active: true,
            errored: false,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// An indexed audio file. Written by the indexer, read-only to the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFile {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MusicFile {
    #[cfg(test)]
    pub fn new(artist: impl Into<String>, title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            artist: artist.into(),
            title: title.into(),
            path: path.into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// When the library last changed versus when the catalog last caught up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Set by the download batch: files may have changed at this time
    pub last_updated: DateTime<Utc>,
    /// Set once the indexer finished: the catalog reflects the library as of this time
    pub last_indexed: DateTime<Utc>,
}

impl IndexStatus {
    /// The catalog is behind the library
    pub fn is_stale(&self) -> bool {
        self.last_updated > self.last_indexed
    }
}

impl Default for IndexStatus {
    fn default() -> Self {
        Self {
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            last_indexed: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}
