//! Index gate: playlists are only assembled against an up-to-date catalog

use crate::db::{IndexStatus, RequestStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct IndexGate {
    store: Arc<dyn RequestStore>,
}

impl IndexGate {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// True unless the library changed after the last completed indexing
    pub fn ready_for_playlist_processing(&self) -> Result<bool> {
        Ok(!self.store.get_index_status()?.is_stale())
    }

    /// Record that files may have changed and the catalog needs to catch up
    pub fn mark_library_updated(&self) -> Result<()> {
        self.stamp(|status| status.last_updated = Utc::now())
    }

    /// Record that the catalog reflects the library as of `at`
    pub fn mark_indexed(&self, at: DateTime<Utc>) -> Result<()> {
        self.stamp(|status| status.last_indexed = at)
    }

    fn stamp(&self, change: impl FnOnce(&mut IndexStatus)) -> Result<()> {
        let mut status = self.store.get_index_status()?;
        change(&mut status);
        self.store.update_index_status(&status)?;
        debug!(
            "Index status: updated {}, indexed {}",
            status.last_updated, status.last_indexed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    fn gate() -> IndexGate {
        IndexGate::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_fresh_store_is_ready() {
        assert!(gate().ready_for_playlist_processing().unwrap());
    }

    #[test]
    fn test_update_closes_and_index_reopens() {
        let gate = gate();

        gate.mark_library_updated().unwrap();
        assert!(!gate.ready_for_playlist_processing().unwrap());

        gate.mark_indexed(Utc::now() + Duration::seconds(1)).unwrap();
        assert!(gate.ready_for_playlist_processing().unwrap());
    }

    #[test]
    fn test_index_started_before_update_stays_closed() {
        let gate = gate();
        let started = Utc::now() - Duration::minutes(5);

        gate.mark_library_updated().unwrap();
        gate.mark_indexed(started).unwrap();

        assert!(!gate.ready_for_playlist_processing().unwrap());
    }
}
