//! The reconciliation loop: downloads, then indexing, then playlists

use crate::config::Settings;
use crate::db::{CatalogStore, RequestStore};
use crate::download::{DownloadManager, Downloader, RequestReconciler};
use crate::indexer::Indexer;
use crate::metadata::MetadataProvider;
use crate::playlist::{root_rewrite, IndexGate, PlaylistAssembler, PlaylistManager};
use crate::policy::SyncPolicy;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Orchestrator {
    downloads: DownloadManager,
    playlists: PlaylistManager,
    indexer: Option<Indexer>,
    gate: IndexGate,
    cycle_interval: Duration,
}

impl Orchestrator {
    /// Wire every component from the settings and the injected collaborators
    pub fn new<S>(
        settings: &Settings,
        store: Arc<S>,
        metadata: Arc<dyn MetadataProvider>,
        downloader: Arc<dyn Downloader>,
    ) -> Self
    where
        S: RequestStore + CatalogStore + 'static,
    {
        let requests: Arc<dyn RequestStore> = store.clone();
        let catalog: Arc<dyn CatalogStore> = store;
        let policy = SyncPolicy::new(&settings.sync);
        let gate = IndexGate::new(requests.clone());

        let reconciler = RequestReconciler::new(
            requests.clone(),
            catalog.clone(),
            metadata.clone(),
            downloader,
            policy,
        );
        let downloads = DownloadManager::new(
            requests.clone(),
            metadata.clone(),
            reconciler,
            gate.clone(),
            policy,
            Duration::from_secs(settings.sync.request_delay_secs),
        );

        let library = &settings.library;
        let assembler = PlaylistAssembler::new(
            requests.clone(),
            catalog,
            metadata,
            library.playlists_root.clone(),
            root_rewrite(library.storage_root.clone(), library.playback_root.clone()),
        );
        let playlists = PlaylistManager::new(requests, assembler, gate.clone(), policy);

        let indexer = settings
            .indexer
            .as_ref()
            .map(|indexer| Indexer::new(indexer, gate.clone()));

        Self {
            downloads,
            playlists,
            indexer,
            gate,
            cycle_interval: Duration::from_secs(settings.sync.cycle_interval_secs),
        }
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn playlists(&self) -> &PlaylistManager {
        &self.playlists
    }

    pub fn gate(&self) -> &IndexGate {
        &self.gate
    }

    /// One full cycle. Every phase runs even if an earlier one failed;
    /// the failures are reported together.
    pub async fn run_cycle(&self) -> Result<()> {
        let mut failures = Vec::new();

        match self.downloads.process_active_requests().await {
            Ok(report) if report.processed > 0 => info!(
                "Downloads: {} processed, {} finished, {} failed",
                report.processed, report.finished, report.failed
            ),
            Ok(_) => {}
            Err(e) => {
                error!("Download phase failed: {:#}", e);
                failures.push(format!("downloads: {:#}", e));
            }
        }

        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.run_if_stale().await {
                error!("Indexer failed: {:#}", e);
                failures.push(format!("indexer: {:#}", e));
            }
        }

        match self.playlists.process_active_requests().await {
            Ok(report) if !report.gated => info!(
                "Playlists: {} written, {} waiting, {} failed",
                report.written, report.waiting, report.failed
            ),
            Ok(_) => {}
            Err(e) => {
                error!("Playlist phase failed: {:#}", e);
                failures.push(format!("playlists: {:#}", e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Cycle finished with errors: {}", failures.join("; ")))
        }
    }

    /// Run cycles until Ctrl-C or SIGTERM. An interrupted cycle is dropped,
    /// which also kills a running downloader.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Reconciling every {}s",
            self.cycle_interval.as_secs()
        );

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                signal = &mut shutdown => return stopped(signal),
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        error!("{:#}", e);
                    }
                }
            }

            tokio::select! {
                signal = &mut shutdown => return stopped(signal),
                _ = tokio::time::sleep(self.cycle_interval) => {}
            }
        }
    }
}

fn stopped(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for shutdown signals")?;
    info!("Shutting down");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
