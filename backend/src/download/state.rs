//! Pure state transitions for download requests and their tracks.
//!
//! Nothing here touches the store or the network: the reconciliation task
//! produces events, these functions fold them into the request, and the
//! manager persists the result.

use crate::db::{DownloadRequest, TrackProgress};
use crate::matching;
use crate::policy::SyncPolicy;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Where a single track stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    Found,
    Skipped,
}

/// Something that happened to a track during a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    /// The catalog holds a file for this track
    Matched,
    /// The catalog was checked and has no file for it
    NotMatched,
    /// The downloader failed on this track
    DownloadFailed,
    /// The track has no URL of its own and can never be fetched individually
    MissingSource,
}

impl TrackProgress {
    pub fn state(&self) -> TrackState {
        if self.skipped {
            TrackState::Skipped
        } else if self.found {
            TrackState::Found
        } else {
            TrackState::Pending
        }
    }

    /// Fold one event into the track. Skipped is terminal and absorbs every event.
    pub fn apply(mut self, event: TrackEvent, max_failed_attempts: u32) -> Self {
        if self.skipped {
            return self;
        }

        match event {
            TrackEvent::Matched => {
                self.found = true;
                self.failed_attempts = 0;
            }
            TrackEvent::NotMatched | TrackEvent::DownloadFailed => {
                self.found = false;
                self.failed_attempts += 1;
                if self.failed_attempts >= max_failed_attempts {
                    self.skipped = true;
                }
            }
            TrackEvent::MissingSource => {
                self.skipped = true;
            }
        }

        self
    }

    /// In-place form of [`TrackProgress::apply`]
    pub fn record(&mut self, event: TrackEvent, max_failed_attempts: u32) {
        let current = std::mem::take(self);
        *self = current.apply(event, max_failed_attempts);
    }

    pub fn key(&self) -> String {
        matching::key(&self.artist, &self.title)
    }
}

/// Result of one reconciliation attempt, as seen by the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
}

/// Lifecycle position of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Active,
    /// Still active but at least one attempt failed
    Retrying,
    Finished,
}

/// Counts derived from the track list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSummary {
    pub expected: u32,
    /// Expected minus skipped
    pub effective_expected: u32,
    pub found: u32,
    pub skipped: u32,
    pub percentage: f64,
}

impl DownloadRequest {
    pub fn status(&self) -> RequestStatus {
        match (self.active, self.errored) {
            (false, _) => RequestStatus::Finished,
            (true, true) => RequestStatus::Retrying,
            (true, false) => RequestStatus::Active,
        }
    }

    /// Every track is found or skipped. An empty track list is never complete:
    /// progress is unknown, and only the sync ceiling can end such a request.
    pub fn is_complete(&self) -> bool {
        !self.track_metadata.is_empty()
            && self
                .track_metadata
                .iter()
                .all(|track| track.found || track.skipped)
    }

    pub fn skipped_count(&self) -> u32 {
        self.track_metadata.iter().filter(|t| t.skipped).count() as u32
    }

    pub fn found_count(&self) -> u32 {
        self.track_metadata
            .iter()
            .filter(|t| t.found && !t.skipped)
            .count() as u32
    }

    pub fn progress(&self) -> ProgressSummary {
        let skipped = self.skipped_count();
        let found = self.found_count();
        let effective_expected = self.expected_track_count.saturating_sub(skipped);

        ProgressSummary {
            expected: self.expected_track_count,
            effective_expected,
            found,
            skipped,
            percentage: found as f64 / effective_expected.max(1) as f64 * 100.0,
        }
    }

    /// Merge a freshly fetched listing into the track list without ever shrinking it.
    ///
    /// Known tracks keep their progress (matched by URL, else by matching key),
    /// unknown ones are appended in listing order.
    pub fn merge_track_listing(&mut self, expected: u32, fresh: Vec<TrackProgress>) {
        if self.track_metadata.is_empty() {
            self.track_metadata = fresh;
        } else {
            let mut by_url: HashMap<String, usize> = HashMap::new();
            let mut by_key: HashMap<String, usize> = HashMap::new();
            for (i, track) in self.track_metadata.iter().enumerate() {
                if !track.source_url.is_empty() {
                    by_url.entry(track.source_url.clone()).or_insert(i);
                }
                by_key.entry(track.key()).or_insert(i);
            }

            for track in fresh {
                let existing = by_url
                    .get(&track.source_url)
                    .or_else(|| by_key.get(&track.key()))
                    .copied();

                match existing {
                    Some(i) => {
                        // Older entries may lack the URL the provider now reports
                        if self.track_metadata[i].source_url.is_empty() {
                            self.track_metadata[i].source_url = track.source_url;
                        }
                    }
                    None => {
                        let i = self.track_metadata.len();
                        if !track.source_url.is_empty() {
                            by_url.insert(track.source_url.clone(), i);
                        }
                        by_key.insert(track.key(), i);
                        self.track_metadata.push(track);
                    }
                }
            }
        }

        self.expected_track_count = expected.max(self.track_metadata.len() as u32);
    }

    /// Close one processing attempt.
    ///
    /// A failed attempt marks the request errored, counts a retry and
    /// consumes one sync attempt, ending the request once the budget is
    /// spent. A successful one ends the request when every track is settled
    /// or the sync budget is spent; otherwise it consumes one sync attempt.
    pub fn conclude_attempt(
        mut self,
        outcome: &AttemptOutcome,
        policy: &SyncPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        match outcome {
            AttemptOutcome::Failed(_) => {
                self.errored = true;
                self.retry_count += 1;
                self.sync_count += 1;
                if self.sync_count >= policy.max_sync_attempts {
                    self.active = false;
                }
            }
            AttemptOutcome::Succeeded => {
                if self.is_complete() || self.sync_count >= policy.max_sync_attempts {
                    self.active = false;
                } else {
                    self.sync_count += 1;
                }
            }
        }

        self.found_track_count = self.found_count();
        self.updated_at = now;
        self
    }
}

/// Processing order: healthy requests before errored ones, oldest first in each group.
/// The sort is stable, so ties keep their listing order.
pub fn order_requests(requests: &mut [DownloadRequest]) {
    requests.sort_by_key(|r| (r.errored, r.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn track(artist: &str, title: &str) -> TrackProgress {
        TrackProgress::new(artist, title, format!("https://open.spotify.com/track/{title}"))
    }

    fn request_with(tracks: Vec<TrackProgress>) -> DownloadRequest {
        let mut request = DownloadRequest::new("https://open.spotify.com/album/a", "A", None);
        request.expected_track_count = tracks.len() as u32;
        request.track_metadata = tracks;
        request
    }

    #[test]
    fn test_is_complete_false_when_empty() {
        let request = request_with(vec![]);
        assert!(!request.is_complete());
    }

    #[test]
    fn test_is_complete_requires_every_track_settled() {
        let mut request = request_with(vec![track("A", "1"), track("A", "2")]);
        assert!(!request.is_complete());

        request.track_metadata[0].found = true;
        assert!(!request.is_complete());

        request.track_metadata[1].skipped = true;
        assert!(request.is_complete());
    }

    #[test]
    fn test_failed_attempts_reach_skip_threshold() {
        let mut t = track("A", "1");
        t.record(TrackEvent::NotMatched, 3);
        t.record(TrackEvent::DownloadFailed, 3);
        assert!(!t.skipped);
        assert_eq!(t.failed_attempts, 2);

        t.record(TrackEvent::NotMatched, 3);
        assert!(t.skipped);
        assert_eq!(t.state(), TrackState::Skipped);
    }

    #[test]
    fn test_skipped_is_terminal() {
        let mut t = track("A", "1");
        t.record(TrackEvent::MissingSource, 3);
        assert!(t.skipped);

        t.record(TrackEvent::Matched, 3);
        assert!(t.skipped);
        assert!(!t.found);
        assert_eq!(t.failed_attempts, 0);
    }

    #[test]
    fn test_found_can_flip_until_skipped() {
        let mut t = track("A", "1");
        t.record(TrackEvent::Matched, 3);
        assert_eq!(t.state(), TrackState::Found);

        t.record(TrackEvent::NotMatched, 3);
        assert_eq!(t.state(), TrackState::Pending);
        assert_eq!(t.failed_attempts, 1);

        t.record(TrackEvent::Matched, 3);
        assert_eq!(t.state(), TrackState::Found);
        assert_eq!(t.failed_attempts, 0);
    }

    #[test]
    fn test_percentage_never_divides_by_zero() {
        let mut request = request_with(vec![track("A", "1"), track("A", "2")]);
        for t in &mut request.track_metadata {
            t.skipped = true;
        }

        let progress = request.progress();
        assert_eq!(progress.effective_expected, 0);
        assert_eq!(progress.found, 0);
        assert_eq!(progress.percentage, 0.0);
    }

    #[test]
    fn test_percentage_uses_effective_expected() {
        let mut request = request_with(vec![track("A", "1"), track("A", "2"), track("A", "3")]);
        request.track_metadata[0].found = true;
        request.track_metadata[2].skipped = true;

        let progress = request.progress();
        assert_eq!(progress.expected, 3);
        assert_eq!(progress.effective_expected, 2);
        assert_eq!(progress.skipped, 1);
        assert_eq!(progress.percentage, 50.0);
    }

    #[test]
    fn test_order_puts_errored_last_and_oldest_first() {
        let base = Utc::now();
        let mut requests: Vec<DownloadRequest> = (0..5)
            .map(|i| {
                let mut r = DownloadRequest::new(format!("https://x/{i}"), format!("{i}"), None);
                r.created_at = base + Duration::seconds(10 - i as i64);
                r
            })
            .collect();
        requests[0].errored = true;
        requests[3].errored = true;

        order_requests(&mut requests);

        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["4", "2", "1", "3", "0"]);
        let first_errored = requests.iter().position(|r| r.errored).unwrap();
        assert!(requests[first_errored..].iter().all(|r| r.errored));
    }

    #[test]
    fn test_order_is_stable_on_ties() {
        let created = Utc::now();
        let mut requests: Vec<DownloadRequest> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let mut r = DownloadRequest::new("https://x", *name, None);
                r.created_at = created;
                r
            })
            .collect();

        order_requests(&mut requests);

        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_conclude_failed_attempt() {
        let request = request_with(vec![track("A", "1")]);
        let policy = SyncPolicy::default();

        let request = request.conclude_attempt(&AttemptOutcome::Failed("boom".into()), &policy, Utc::now());

        assert!(request.errored);
        assert!(request.active);
        assert_eq!(request.retry_count, 1);
        assert_eq!(request.sync_count, 1);
        assert_eq!(request.status(), RequestStatus::Retrying);
    }

    #[test]
    fn test_repeated_failures_spend_the_sync_budget() {
        let mut request = request_with(vec![track("A", "1")]);
        let policy = SyncPolicy::default();
        let failed = AttemptOutcome::Failed("downloader exited with status 1".into());

        for _ in 0..2 {
            request = request.conclude_attempt(&failed, &policy, Utc::now());
            assert!(request.active);
        }
        request = request.conclude_attempt(&failed, &policy, Utc::now());

        assert!(!request.active);
        assert_eq!(request.sync_count, 3);
        assert_eq!(request.retry_count, 3);
        assert_eq!(request.status(), RequestStatus::Finished);
    }

    #[test]
    fn test_conclude_incomplete_consumes_sync_attempt() {
        let request = request_with(vec![track("A", "1")]);
        let policy = SyncPolicy::default();

        let request = request.conclude_attempt(&AttemptOutcome::Succeeded, &policy, Utc::now());

        assert!(request.active);
        assert_eq!(request.sync_count, 1);
    }

    #[test]
    fn test_conclude_complete_deactivates() {
        let mut request = request_with(vec![track("A", "1")]);
        request.track_metadata[0].found = true;

        let request =
            request.conclude_attempt(&AttemptOutcome::Succeeded, &SyncPolicy::default(), Utc::now());

        assert!(!request.active);
        assert_eq!(request.found_track_count, 1);
        assert_eq!(request.status(), RequestStatus::Finished);
    }

    #[test]
    fn test_conclude_gives_up_after_sync_ceiling() {
        let mut request = request_with(vec![]);
        let policy = SyncPolicy::default();

        for _ in 0..3 {
            request = request.conclude_attempt(&AttemptOutcome::Succeeded, &policy, Utc::now());
            assert!(request.active);
        }
        assert_eq!(request.sync_count, 3);

        request = request.conclude_attempt(&AttemptOutcome::Succeeded, &policy, Utc::now());
        assert!(!request.active);
        assert_eq!(request.sync_count, 3);
    }

    #[test]
    fn test_merge_fills_empty_list() {
        let mut request = request_with(vec![]);
        request.merge_track_listing(2, vec![track("A", "1"), track("A", "2")]);

        assert_eq!(request.track_metadata.len(), 2);
        assert_eq!(request.expected_track_count, 2);
    }

    #[test]
    fn test_merge_never_shrinks_and_keeps_progress() {
        let mut request = request_with(vec![track("A", "1"), track("A", "2")]);
        request.track_metadata[0].found = true;
        request.track_metadata[1].skipped = true;

        request.merge_track_listing(2, vec![track("a", "1"), track("A", "3")]);

        assert_eq!(request.track_metadata.len(), 3);
        assert!(request.track_metadata[0].found);
        assert!(request.track_metadata[1].skipped);
        assert_eq!(request.track_metadata[2].title, "3");
        assert_eq!(request.expected_track_count, 3);
    }

    #[test]
    fn test_merge_backfills_missing_url() {
        let mut request = request_with(vec![TrackProgress::new("A", "1", "")]);
        request.merge_track_listing(1, vec![track("A", "1")]);

        assert_eq!(request.track_metadata.len(), 1);
        assert_eq!(request.track_metadata[0].source_url, "https://open.spotify.com/track/1");
    }
}
