//! Playlist queue: gating, assembly and retry bookkeeping

use super::assembler::PlaylistAssembler;
use super::gate::IndexGate;
use crate::db::{PlaylistRequest, RequestStore};
use crate::policy::SyncPolicy;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

impl PlaylistRequest {
    /// Close one assembly attempt. Every failure, expected or not, counts
    /// as a retry; the request is dropped once the retry ceiling is reached.
    pub fn conclude_attempt(mut self, succeeded: bool, policy: &SyncPolicy) -> Self {
        if succeeded {
            self.active = false;
        } else {
            self.errored = true;
            self.retry_count += 1;
            if self.retry_count >= policy.max_playlist_retries {
                self.active = false;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistReport {
    /// The catalog was stale and nothing ran
    pub gated: bool,
    pub written: usize,
    pub waiting: usize,
    pub failed: usize,
}

pub struct PlaylistManager {
    requests: Arc<dyn RequestStore>,
    assembler: PlaylistAssembler,
    gate: IndexGate,
    policy: SyncPolicy,
}

impl PlaylistManager {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        assembler: PlaylistAssembler,
        gate: IndexGate,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            requests,
            assembler,
            gate,
            policy,
        }
    }

    /// Assemble every active playlist, unless the catalog is behind the library
    pub async fn process_active_requests(&self) -> Result<PlaylistReport> {
        if !self.gate.ready_for_playlist_processing()? {
            info!("Catalog is being reindexed, skipping playlists this cycle");
            return Ok(PlaylistReport {
                gated: true,
                ..Default::default()
            });
        }

        let requests = self.requests.list_active_playlist_requests()?;
        let mut report = PlaylistReport::default();

        for request in requests {
            let result = self.assembler.assemble(&request).await;
            match &result {
                Ok(_) => report.written += 1,
                Err(e) if e.is_expected() => {
                    info!(playlist = %request.id, "{}: {}", request.source_url, e);
                    report.waiting += 1;
                }
                Err(e) => {
                    error!(playlist = %request.id, "{} failed: {:#}", request.source_url, e);
                    report.failed += 1;
                }
            }

            let request = request.conclude_attempt(result.is_ok(), &self.policy);
            if !request.active && request.errored {
                info!(
                    playlist = %request.id,
                    "Giving up on {} after {} retries",
                    request.source_url,
                    request.retry_count
                );
            }
            if let Err(e) = self.requests.update_playlist_request(&request) {
                error!(playlist = %request.id, "Failed to save playlist state: {:#}", e);
            }
        }

        Ok(report)
    }

    /// Register a playlist for syncing; an active request for the URL is reused
    pub fn add_playlist(&self, url: &str, no_pull: bool) -> Result<PlaylistRequest> {
        let existing = self
            .requests
            .list_active_playlist_requests()?
            .into_iter()
            .find(|r| r.source_url == url);
        if let Some(existing) = existing {
            info!(playlist = %existing.id, "{} is already registered", url);
            return Ok(existing);
        }

        let request = PlaylistRequest::new(url, no_pull);
        self.requests.insert_playlist_request(&request)?;
        info!(playlist = %request.id, "Registered playlist {}", url);
        Ok(request)
    }
}
