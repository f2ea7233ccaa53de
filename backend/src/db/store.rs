//! Narrow store interfaces consumed by the reconciliation components

use super::schema::*;
use anyhow::Result;

/// Download/playlist queues and the index status document
pub trait RequestStore: Send + Sync {
    // === Download requests ===

    fn list_active_download_requests(&self) -> Result<Vec<DownloadRequest>>;

    /// The active download request for a source URL, if any
    fn get_active_download_request(&self, url: &str) -> Result<Option<DownloadRequest>>;

    /// A request for this URL already ran to completion (is no longer active)
    fn is_request_synced(&self, url: &str) -> Result<bool>;

    fn insert_download_request(&self, request: &DownloadRequest) -> Result<()>;

    /// Persist every mutable field. Fails if the request does not exist.
    fn update_download_request(&self, request: &DownloadRequest) -> Result<()>;

    // === Playlist requests ===

    fn list_active_playlist_requests(&self) -> Result<Vec<PlaylistRequest>>;

    fn insert_playlist_request(&self, request: &PlaylistRequest) -> Result<()>;

    fn update_playlist_request(&self, request: &PlaylistRequest) -> Result<()>;

    // === Index status ===

    fn get_index_status(&self) -> Result<IndexStatus>;

    fn update_index_status(&self, status: &IndexStatus) -> Result<()>;
}

/// The catalog of indexed audio files
pub trait CatalogStore: Send + Sync {
    /// Batch lookup by parallel (artist, title) arrays, case-insensitive
    fn find_music_files(&self, artists: &[String], titles: &[String]) -> Result<Vec<MusicFile>>;

    /// The catalog is filled by the external indexer; only tests write to it
    #[cfg(test)]
    fn insert_music_file(&self, file: &MusicFile) -> Result<()>;
}
