//! Turns a playlist request into an M3U file of indexed tracks

use super::m3u::{self, M3uError};
use crate::db::{CatalogStore, DownloadRequest, ObjectKind, PlaylistRequest, RequestStore};
use crate::matching::{self, CatalogIndex};
use crate::metadata::{MetadataError, MetadataProvider, TrackInfo};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Maps a catalog path to the path the player sees
pub type PathMapper = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Replace a leading `from` with `to`; other paths pass through unchanged
pub fn root_rewrite(from: impl Into<String>, to: impl Into<String>) -> PathMapper {
    let from = from.into();
    let to = to.into();
    Arc::new(move |path: &str| match path.strip_prefix(from.as_str()) {
        Some(rest) => format!("{}{}", to, rest),
        None => path.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("a download request for this playlist is still active")]
    NotReady,

    #[error("{pending} tracks are still downloading ({queued} newly queued)")]
    MissingFiles { queued: usize, pending: usize },

    #[error("none of the playlist's tracks are indexed")]
    NothingIndexed,

    #[error("playlist file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlaylistError {
    /// Retry-later conditions, as opposed to genuine failures
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::MissingFiles { .. } | Self::AlreadyExists(_)
        )
    }
}

impl From<M3uError> for PlaylistError {
    fn from(err: M3uError) -> Self {
        match err {
            M3uError::AlreadyExists(path) => Self::AlreadyExists(path),
            M3uError::Io(e) => Self::Other(e.into()),
        }
    }
}

pub struct PlaylistAssembler {
    requests: Arc<dyn RequestStore>,
    catalog: Arc<dyn CatalogStore>,
    metadata: Arc<dyn MetadataProvider>,
    playlists_root: PathBuf,
    map_path: PathMapper,
}

impl PlaylistAssembler {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        catalog: Arc<dyn CatalogStore>,
        metadata: Arc<dyn MetadataProvider>,
        playlists_root: PathBuf,
        map_path: PathMapper,
    ) -> Self {
        Self {
            requests,
            catalog,
            metadata,
            playlists_root,
            map_path,
        }
    }

    /// Assemble the playlist and write its file, returning the file path.
    ///
    /// Tracks missing from the catalog are queued for download unless the
    /// request says `no_pull`. While any of them is still being downloaded
    /// the playlist waits ([`PlaylistError::MissingFiles`]); once their
    /// downloads have settled it is written with whatever gaps remain.
    pub async fn assemble(&self, request: &PlaylistRequest) -> Result<PathBuf, PlaylistError> {
        let url = request.source_url.as_str();
        if self.requests.get_active_download_request(url)?.is_some() {
            return Err(PlaylistError::NotReady);
        }

        let name = self.metadata.object_name(url).await?;
        let entries = self.metadata.playlist_tracks(url).await?;
        let slots = entries.len();
        let tracks: Vec<TrackInfo> = entries.into_iter().filter_map(|e| e.track).collect();
        if tracks.len() < slots {
            debug!("{}: ignoring {} empty playlist slots", name, slots - tracks.len());
        }

        let credits: Vec<String> = tracks.iter().map(TrackInfo::artist_credit).collect();
        let (artists, titles) = matching::lookup_pairs(
            credits
                .iter()
                .zip(&tracks)
                .map(|(credit, track)| (credit.as_str(), track.primary_artist(), track.title.as_str())),
        );
        let found = self.catalog.find_music_files(&artists, &titles)?;
        if found.is_empty() {
            return Err(PlaylistError::NothingIndexed);
        }
        let index = CatalogIndex::new(found);

        let mut paths = Vec::with_capacity(tracks.len());
        let mut missing = Vec::new();
        for (credit, track) in credits.iter().zip(&tracks) {
            match index.resolve_credited(credit, track.primary_artist(), &track.title) {
                Some(file) => paths.push((self.map_path)(&file.path)),
                None => missing.push(track),
            }
        }

        if !missing.is_empty() {
            info!("{}: {} of {} tracks are not indexed", name, missing.len(), tracks.len());
            if !request.no_pull {
                let (queued, pending) = self.queue_missing(&missing)?;
                if pending > 0 {
                    return Err(PlaylistError::MissingFiles { queued, pending });
                }
            }
        }

        let path = m3u::create_m3u_playlist(&self.playlists_root, &name, &paths)?;
        info!("Wrote {} tracks to {}", paths.len(), path.display());
        Ok(path)
    }

    /// Queue a single-track download for every missing track that has no
    /// request yet. Returns (newly queued, still downloading), where the
    /// second count includes the first.
    fn queue_missing(&self, missing: &[&TrackInfo]) -> anyhow::Result<(usize, usize)> {
        let mut queued = 0;
        let mut pending = 0;

        for track in missing {
            if track.url.is_empty() {
                debug!("\"{}\" has no source URL, leaving it out", track.display_name());
                continue;
            }
            if self.requests.get_active_download_request(&track.url)?.is_some() {
                pending += 1;
                continue;
            }
            if self.requests.is_request_synced(&track.url)? {
                continue;
            }

            let request =
                DownloadRequest::new(track.url.as_str(), track.display_name(), Some(ObjectKind::Track));
            self.requests.insert_download_request(&request)?;
            info!(request = %request.id, "Queued missing track \"{}\"", request.name);
            queued += 1;
            pending += 1;
        }

        Ok((queued, pending))
    }
}
