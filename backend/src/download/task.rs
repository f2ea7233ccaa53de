//! One reconciliation pass over a single download request

use super::downloader::Downloader;
use super::state::{TrackEvent, TrackState};
use crate::db::{CatalogStore, DownloadRequest, ObjectKind, RequestStore, TrackProgress};
use crate::matching::{self, CatalogIndex};
use crate::metadata::MetadataProvider;
use crate::policy::SyncPolicy;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Brings a request's track list up to date against the catalog, invoking
/// the downloader for whatever is missing.
pub struct RequestReconciler {
    requests: Arc<dyn RequestStore>,
    catalog: Arc<dyn CatalogStore>,
    metadata: Arc<dyn MetadataProvider>,
    downloader: Arc<dyn Downloader>,
    policy: SyncPolicy,
}

impl RequestReconciler {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        catalog: Arc<dyn CatalogStore>,
        metadata: Arc<dyn MetadataProvider>,
        downloader: Arc<dyn Downloader>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            requests,
            catalog,
            metadata,
            downloader,
            policy,
        }
    }

    /// Run one attempt. The request is updated in place and persisted as it
    /// goes; an error means the attempt as a whole failed.
    pub async fn reconcile(&self, request: &mut DownloadRequest) -> Result<()> {
        self.fetch_expected_tracks(request).await;
        let kind = self.resolve_kind(request).await;

        self.pre_check_against_catalog(request)?;
        self.persist(request);

        let failed = if kind == Some(ObjectKind::Playlist) && !request.track_metadata.is_empty() {
            self.download_missing(request).await?
        } else {
            self.download_bulk(request).await?;
            HashSet::new()
        };

        self.refresh_found_tracks(request, &failed)?;
        self.log_progress(request);
        Ok(())
    }

    /// Populate the track list from the provider when it is still unknown.
    /// A provider failure is logged and the request carries on untracked.
    pub async fn fetch_expected_tracks(&self, request: &mut DownloadRequest) {
        if request.expected_track_count > 0 && !request.track_metadata.is_empty() {
            return;
        }

        match self.metadata.expected_tracks(&request.source_url).await {
            Ok(listing) => {
                request.merge_track_listing(listing.expected_count, listing.tracks);
                debug!(
                    request = %request.id,
                    "Fetched {} expected tracks",
                    request.expected_track_count
                );
                self.persist(request);
            }
            Err(e) => warn!(
                request = %request.id,
                "Could not fetch expected tracks for {}: {}",
                request.source_url,
                e
            ),
        }
    }

    /// Ask the provider for the object kind once and remember it
    pub async fn resolve_kind(&self, request: &mut DownloadRequest) -> Option<ObjectKind> {
        if request.kind.is_some() {
            return request.kind;
        }

        match self.metadata.object_kind(&request.source_url).await {
            Ok(kind) => {
                request.kind = Some(kind);
                self.persist(request);
            }
            Err(e) => warn!(
                request = %request.id,
                "Could not resolve the kind of {}, syncing in bulk: {}",
                request.source_url,
                e
            ),
        }

        request.kind
    }

    /// Mark every track the catalog already holds as found, before any download
    pub fn pre_check_against_catalog(&self, request: &mut DownloadRequest) -> Result<()> {
        let candidates = unsettled(&request.track_metadata, |_| true);
        if candidates.is_empty() {
            return Ok(());
        }

        let index = self.lookup(&request.track_metadata, &candidates)?;
        let mut matched = 0;
        for i in candidates {
            let track = &mut request.track_metadata[i];
            if index.contains(&track.artist, &track.title) {
                track.record(TrackEvent::Matched, self.policy.max_failed_attempts);
                matched += 1;
            }
        }

        if matched > 0 {
            debug!(request = %request.id, "{} tracks already in the catalog", matched);
        }
        request.found_track_count = request.found_count();
        Ok(())
    }

    /// Download the pending tracks of a playlist one at a time, in list order.
    ///
    /// Returns the indices whose download failed in this pass.
    pub async fn download_missing(&self, request: &mut DownloadRequest) -> Result<HashSet<usize>> {
        let max = self.policy.max_failed_attempts;
        let mut failed = HashSet::new();

        for i in 0..request.track_metadata.len() {
            let track = &request.track_metadata[i];
            if track.state() != TrackState::Pending {
                continue;
            }

            if track.source_url.is_empty() {
                warn!(
                    request = %request.id,
                    "Skipping \"{} - {}\": no source URL",
                    track.artist,
                    track.title
                );
                request.track_metadata[i].record(TrackEvent::MissingSource, max);
                self.persist(request);
                continue;
            }

            let url = track.source_url.clone();
            info!(request = %request.id, "Downloading \"{} - {}\"", track.artist, track.title);

            match self.downloader.download_track(&url).await {
                Ok(()) => {
                    let index = self.lookup(&request.track_metadata, &[i])?;
                    let track = &mut request.track_metadata[i];
                    if index.contains(&track.artist, &track.title) {
                        track.record(TrackEvent::Matched, max);
                    } else {
                        debug!(request = %request.id, "{} downloaded but not indexed yet", url);
                    }
                }
                Err(e) => {
                    warn!(request = %request.id, "Download of {} failed: {:#}", url, e);
                    request.track_metadata[i].record(TrackEvent::DownloadFailed, max);
                    failed.insert(i);
                }
            }

            request.found_track_count = request.found_count();
            self.persist(request);
        }

        Ok(failed)
    }

    /// Sync the whole URL in one downloader run, keeping files already present
    pub async fn download_bulk(&self, request: &DownloadRequest) -> Result<()> {
        info!(request = %request.id, "Syncing {} ({})", request.name, request.source_url);

        self.downloader
            .sync_collection(&request.source_url)
            .await
            .with_context(|| format!("Failed to sync {}", request.source_url))
    }

    /// Recount found tracks with one catalog lookup. Tracks still missing are
    /// charged a failed attempt, except those in `exempt` which were already
    /// charged for a failed download in this pass.
    pub fn refresh_found_tracks(
        &self,
        request: &mut DownloadRequest,
        exempt: &HashSet<usize>,
    ) -> Result<()> {
        let candidates = unsettled_or_found(&request.track_metadata, |i| !exempt.contains(&i));
        if !candidates.is_empty() {
            let index = self.lookup(&request.track_metadata, &candidates)?;
            for i in candidates {
                let track = &mut request.track_metadata[i];
                let event = if index.contains(&track.artist, &track.title) {
                    TrackEvent::Matched
                } else {
                    TrackEvent::NotMatched
                };
                track.record(event, self.policy.max_failed_attempts);
            }
        }

        request.found_track_count = request.found_count();
        Ok(())
    }

    fn lookup(&self, tracks: &[TrackProgress], indices: &[usize]) -> Result<CatalogIndex> {
        let (artists, titles) = matching::lookup_pairs(
            indices
                .iter()
                .map(|&i| {
                    let artist = tracks[i].artist.as_str();
                    (artist, matching::primary_artist(artist), tracks[i].title.as_str())
                }),
        );
        let files = self
            .catalog
            .find_music_files(&artists, &titles)
            .context("Catalog lookup failed")?;
        Ok(CatalogIndex::new(files))
    }

    /// Persistence inside a pass is best effort; the manager writes the final state
    fn persist(&self, request: &DownloadRequest) {
        if let Err(e) = self.requests.update_download_request(request) {
            warn!(request = %request.id, "Failed to save progress: {:#}", e);
        }
    }

    fn log_progress(&self, request: &DownloadRequest) {
        if request.track_metadata.is_empty() {
            info!(request = %request.id, "{}: progress unknown", request.name);
            return;
        }

        let progress = request.progress();
        info!(
            request = %request.id,
            "{}: {}/{} found ({} expected, {} skipped, {:.1}%)",
            request.name,
            progress.found,
            progress.effective_expected,
            progress.expected,
            progress.skipped,
            progress.percentage
        );
    }
}

/// Indices of tracks neither found nor skipped that pass `filter`
fn unsettled(tracks: &[TrackProgress], filter: impl Fn(usize) -> bool) -> Vec<usize> {
    tracks
        .iter()
        .enumerate()
        .filter(|(i, t)| !t.found && !t.skipped && filter(*i))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of every non-skipped track that passes `filter`
fn unsettled_or_found(tracks: &[TrackProgress], filter: impl Fn(usize) -> bool) -> Vec<usize> {
    tracks
        .iter()
        .enumerate()
        .filter(|(i, t)| !t.skipped && filter(*i))
        .map(|(i, _)| i)
        .collect()
}
