//! Retry ceilings for download requests, tracks and playlists.

use crate::config::SyncSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Attempts after which an incomplete download request is given up
    pub max_sync_attempts: u32,
    /// Per-track failures after which the track is skipped permanently
    pub max_failed_attempts: u32,
    /// Retries after which a playlist request is deactivated
    pub max_playlist_retries: u32,
}

impl SyncPolicy {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            max_sync_attempts: settings.max_sync_attempts,
            max_failed_attempts: settings.max_failed_attempts.max(1),
            max_playlist_retries: settings.max_playlist_retries,
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_sync_attempts: 3,
            max_failed_attempts: 3,
            max_playlist_retries: 5,
        }
    }
}
