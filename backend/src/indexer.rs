//! Optional external indexer, run when downloads left the catalog stale

use crate::config::IndexerSettings;
use crate::playlist::IndexGate;
use crate::process;
use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

pub struct Indexer {
    program: String,
    args: Vec<String>,
    gate: IndexGate,
}

impl Indexer {
    pub fn new(settings: &IndexerSettings, gate: IndexGate) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            gate,
        }
    }

    /// Run the indexer if the catalog is behind the library.
    ///
    /// On success `last_indexed` is set to when the run *started*, so files
    /// written while it was running still count as unindexed.
    pub async fn run_if_stale(&self) -> Result<bool> {
        if self.gate.ready_for_playlist_processing()? {
            debug!("Catalog is up to date, not indexing");
            return Ok(false);
        }

        let started = Utc::now();
        info!("Running indexer {}", self.program);
        process::run_streamed(&self.program, &self.args, "indexer").await?;

        self.gate.mark_indexed(started)?;
        info!("Indexing finished");
        Ok(true)
    }
}
