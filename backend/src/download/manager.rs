//! Download queue: ordering, lifecycle decisions and persistence

use super::state::{order_requests, AttemptOutcome, RequestStatus};
use super::task::RequestReconciler;
use crate::db::{DownloadRequest, RequestStore};
use crate::metadata::MetadataProvider;
use crate::playlist::IndexGate;
use crate::policy::SyncPolicy;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What one pass over the download queue did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub finished: usize,
    pub failed: usize,
}

/// Processes the active download requests, one at a time
pub struct DownloadManager {
    requests: Arc<dyn RequestStore>,
    metadata: Arc<dyn MetadataProvider>,
    reconciler: RequestReconciler,
    gate: IndexGate,
    policy: SyncPolicy,

    /// Pause before each request
    request_delay: Duration,
}

impl DownloadManager {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        metadata: Arc<dyn MetadataProvider>,
        reconciler: RequestReconciler,
        gate: IndexGate,
        policy: SyncPolicy,
        request_delay: Duration,
    ) -> Self {
        Self {
            requests,
            metadata,
            reconciler,
            gate,
            policy,
            request_delay,
        }
    }

    /// Run every active request once, healthy ones first, oldest first.
    ///
    /// A failing request never stops the batch. Only listing the queue and
    /// stamping the index status can fail the whole pass.
    pub async fn process_active_requests(&self) -> Result<BatchReport> {
        let mut requests = self.requests.list_active_download_requests()?;
        if requests.is_empty() {
            debug!("No active download requests");
            return Ok(BatchReport::default());
        }

        order_requests(&mut requests);
        info!("Processing {} download requests", requests.len());

        let mut report = BatchReport::default();
        for request in requests {
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let (request, outcome) = self.process_one(request).await;
            report.processed += 1;
            match outcome {
                AttemptOutcome::Failed(_) => report.failed += 1,
                AttemptOutcome::Succeeded if !request.active => report.finished += 1,
                AttemptOutcome::Succeeded => {}
            }
        }

        // Files may have landed on disk: the catalog needs reindexing
        self.gate.mark_library_updated()?;

        info!(
            "Download batch done: {} processed, {} finished, {} failed",
            report.processed, report.finished, report.failed
        );
        Ok(report)
    }

    async fn process_one(&self, mut request: DownloadRequest) -> (DownloadRequest, AttemptOutcome) {
        info!(
            request = %request.id,
            "Processing {} (attempt {}, {} retries)",
            request.name,
            request.sync_count + 1,
            request.retry_count
        );

        let outcome = match self.reconciler.reconcile(&mut request).await {
            Ok(()) => AttemptOutcome::Succeeded,
            Err(e) => {
                error!(request = %request.id, "Processing {} failed: {:#}", request.name, e);
                AttemptOutcome::Failed(format!("{:#}", e))
            }
        };

        let request = request.conclude_attempt(&outcome, &self.policy, Utc::now());
        match (request.status(), &outcome) {
            (RequestStatus::Finished, AttemptOutcome::Failed(reason)) => info!(
                request = %request.id,
                "Giving up on {} after {} failed attempts, last error: {}",
                request.name,
                request.retry_count,
                reason
            ),
            (RequestStatus::Finished, AttemptOutcome::Succeeded) => info!(
                request = %request.id,
                "{} finished with {}/{} tracks",
                request.name,
                request.found_track_count,
                request.expected_track_count
            ),
            (RequestStatus::Retrying, _) => debug!(
                request = %request.id,
                "{} will be retried ({} failures so far)",
                request.name,
                request.retry_count
            ),
            (RequestStatus::Active, _) => {}
        }

        if let Err(e) = self.requests.update_download_request(&request) {
            error!(request = %request.id, "Failed to save request state: {:#}", e);
        }

        (request, outcome)
    }

    /// Queue a URL for download unless an active request for it already exists.
    ///
    /// Returns the new request, or `None` when the URL was already queued.
    pub async fn enqueue(&self, url: &str) -> Result<Option<DownloadRequest>> {
        if let Some(existing) = self.requests.get_active_download_request(url)? {
            info!(request = %existing.id, "{} is already queued", url);
            return Ok(None);
        }

        let kind = self.metadata.object_kind(url).await?;
        let name = self.metadata.object_name(url).await?;

        let request = DownloadRequest::new(url, name, Some(kind));
        self.requests.insert_download_request(&request)?;
        info!(request = %request.id, "Queued {} \"{}\"", kind, request.name);

        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogStore, Database, MusicFile, ObjectKind, TrackProgress};
    use crate::testing::{track_info, FakeDownloader, FakeMetadata};
    use chrono::Duration as ChronoDuration;

    const ALBUM: &str = "https://open.spotify.com/album/a1";

    fn manager(db: &Database, metadata: FakeMetadata, downloader: FakeDownloader) -> DownloadManager {
        let metadata: Arc<dyn MetadataProvider> = Arc::new(metadata);
        let store: Arc<dyn RequestStore> = Arc::new(db.clone());
        let reconciler = RequestReconciler::new(
            store.clone(),
            Arc::new(db.clone()),
            metadata.clone(),
            Arc::new(downloader),
            SyncPolicy::default(),
        );

        DownloadManager::new(
            store.clone(),
            metadata,
            reconciler,
            IndexGate::new(store),
            SyncPolicy::default(),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_partial_progress_keeps_request_active() {
        let db = Database::in_memory().unwrap();
        let mut request = DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album));
        request.expected_track_count = 3;
        request.track_metadata = ["One", "Two", "Three"]
            .iter()
            .enumerate()
            .map(|(i, title)| {
                TrackProgress::new("Foo", *title, format!("https://open.spotify.com/track/t{i}"))
            })
            .collect();
        db.insert_download_request(&request).unwrap();
        db.insert_music_file(&MusicFile::new("foo", "one", "/mnt/music/1.mp3")).unwrap();
        db.insert_music_file(&MusicFile::new("FOO", "Three", "/mnt/music/3.mp3")).unwrap();

        let report = manager(&db, FakeMetadata::new(), FakeDownloader::new())
            .process_active_requests()
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.finished, 0);
        let stored = db.get_active_download_request(ALBUM).unwrap().unwrap();
        assert_eq!(stored.found_track_count, 2);
        assert!(!stored.is_complete());
        assert_eq!(stored.sync_count, 1);
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_complete_request_is_deactivated() {
        let db = Database::in_memory().unwrap();
        let metadata = FakeMetadata::new().with_listing(ALBUM, vec![track_info("t1", &["Foo"], "One")]);
        let downloader = FakeDownloader::new()
            .indexing(Arc::new(db.clone()))
            .indexes(ALBUM, vec![MusicFile::new("Foo", "One", "/mnt/music/1.mp3")]);
        let request = DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album));
        db.insert_download_request(&request).unwrap();

        let report = manager(&db, metadata, downloader)
            .process_active_requests()
            .await
            .unwrap();

        assert_eq!(report.finished, 1);
        assert!(db.get_active_download_request(ALBUM).unwrap().is_none());
        assert!(db.is_request_synced(ALBUM).unwrap());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_batch_continues() {
        let db = Database::in_memory().unwrap();
        let broken = "https://open.spotify.com/album/broken";
        let mut first = DownloadRequest::new(broken, "Broken", Some(ObjectKind::Album));
        first.created_at = Utc::now() - ChronoDuration::hours(1);
        let second = DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album));
        db.insert_download_request(&first).unwrap();
        db.insert_download_request(&second).unwrap();

        let downloader = FakeDownloader::new().failing(broken);
        let report = manager(&db, FakeMetadata::new(), downloader)
            .process_active_requests()
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        let broken = db.get_active_download_request(broken).unwrap().unwrap();
        assert!(broken.errored);
        assert_eq!(broken.retry_count, 1);
        assert_eq!(broken.sync_count, 1);
        let healthy = db.get_active_download_request(ALBUM).unwrap().unwrap();
        assert_eq!(healthy.sync_count, 1);
    }

    #[tokio::test]
    async fn test_failing_request_is_dropped_after_sync_budget() {
        let db = Database::in_memory().unwrap();
        db.insert_download_request(&DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album)))
            .unwrap();
        let manager = manager(&db, FakeMetadata::new(), FakeDownloader::new().failing(ALBUM));

        for _ in 0..2 {
            let report = manager.process_active_requests().await.unwrap();
            assert_eq!(report.failed, 1);
            assert!(db.get_active_download_request(ALBUM).unwrap().is_some());
        }
        let report = manager.process_active_requests().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.finished, 0);
        assert!(db.get_active_download_request(ALBUM).unwrap().is_none());
        assert!(db.is_request_synced(ALBUM).unwrap());
        assert_eq!(
            manager.process_active_requests().await.unwrap(),
            BatchReport::default()
        );
    }

    #[tokio::test]
    async fn test_errored_requests_run_last() {
        let db = Database::in_memory().unwrap();
        let older = "https://open.spotify.com/album/older";
        let mut errored = DownloadRequest::new(older, "Older", Some(ObjectKind::Album));
        errored.errored = true;
        errored.created_at = Utc::now() - ChronoDuration::hours(1);
        db.insert_download_request(&errored).unwrap();
        db.insert_download_request(&DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album)))
            .unwrap();

        let downloader = Arc::new(FakeDownloader::new());
        let store: Arc<dyn RequestStore> = Arc::new(db.clone());
        let metadata: Arc<dyn MetadataProvider> = Arc::new(FakeMetadata::new());
        let reconciler = RequestReconciler::new(
            store.clone(),
            Arc::new(db.clone()),
            metadata.clone(),
            downloader.clone(),
            SyncPolicy::default(),
        );
        let manager = DownloadManager::new(
            store.clone(),
            metadata,
            reconciler,
            IndexGate::new(store),
            SyncPolicy::default(),
            Duration::ZERO,
        );

        manager.process_active_requests().await.unwrap();

        assert_eq!(downloader.sync_calls(), vec![ALBUM.to_string(), older.to_string()]);
    }

    #[tokio::test]
    async fn test_batch_stamps_last_updated() {
        let db = Database::in_memory().unwrap();
        db.insert_download_request(&DownloadRequest::new(ALBUM, "Album", Some(ObjectKind::Album)))
            .unwrap();

        manager(&db, FakeMetadata::new(), FakeDownloader::new())
            .process_active_requests()
            .await
            .unwrap();

        assert!(db.get_index_status().unwrap().is_stale());
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_stamp() {
        let db = Database::in_memory().unwrap();

        let report = manager(&db, FakeMetadata::new(), FakeDownloader::new())
            .process_active_requests()
            .await
            .unwrap();

        assert_eq!(report, BatchReport::default());
        assert!(!db.get_index_status().unwrap().is_stale());
    }

    #[tokio::test]
    async fn test_enqueue_resolves_kind_and_name_once() {
        let db = Database::in_memory().unwrap();
        let metadata = FakeMetadata::new().with_listing(ALBUM, vec![]).with_object(
            ALBUM,
            ObjectKind::Album,
            "Great Album",
        );
        let manager = manager(&db, metadata, FakeDownloader::new());

        let created = manager.enqueue(ALBUM).await.unwrap().unwrap();
        assert_eq!(created.name, "Great Album");
        assert_eq!(created.kind, Some(ObjectKind::Album));

        assert!(manager.enqueue(ALBUM).await.unwrap().is_none());
        assert_eq!(db.list_active_download_requests().unwrap().len(), 1);
    }
}
