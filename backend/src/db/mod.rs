//! Database module for persisting the request queues, the catalog and the index status

mod schema;
mod store;

pub use schema::*;
pub use store::*;

use crate::matching;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pairs per catalog query, two bound parameters each
const LOOKUP_CHUNK: usize = 250;

const DOWNLOAD_REQUEST_COLUMNS: &str = "id, source_url, name, object_kind, active, errored, \
     sync_count, retry_count, expected_track_count, found_track_count, track_metadata, \
     created_at, updated_at";

const PLAYLIST_REQUEST_COLUMNS: &str =
    "id, source_url, no_pull, active, errored, retry_count, created_at";

/// Database wrapper for SQLite operations
#[derive(Clone)]
pub struct Database {
    /// None for in-memory databases, which cannot be reopened
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        let db = Self {
            path: Some(path.to_path_buf()),
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;

        Ok(db)
    }

    /// Create a private in-memory database
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let db = Self {
            path: None,
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS download_requests (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                name TEXT NOT NULL,
                object_kind TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                errored INTEGER NOT NULL DEFAULT 0,
                sync_count INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                expected_track_count INTEGER NOT NULL DEFAULT 0,
                found_track_count INTEGER NOT NULL DEFAULT 0,
                track_metadata TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_download_requests_url ON download_requests(source_url, active);
            CREATE INDEX IF NOT EXISTS idx_download_requests_active ON download_requests(active, created_at);

            CREATE TABLE IF NOT EXISTS playlist_requests (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                no_pull INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                errored INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_playlist_requests_active ON playlist_requests(active, created_at);

            CREATE TABLE IF NOT EXISTS music_files (
                id TEXT PRIMARY KEY,
                artist TEXT NOT NULL,
                title TEXT NOT NULL,
                artist_key TEXT NOT NULL,
                title_key TEXT NOT NULL,
                path TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT 'null',
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_music_files_key ON music_files(artist_key, title_key);

            CREATE TABLE IF NOT EXISTS index_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_updated INTEGER NOT NULL,
                last_indexed INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO index_status (id, last_updated, last_indexed) VALUES (1, 0, 0);
            "#,
        )?;

        Ok(())
    }

    /// Run a statement, reopening the file once if the connection went bad
    fn with_conn<T>(&self, op: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();

        match op(&*conn) {
            Err(e) if is_connectivity_error(&e) => {
                let Some(path) = &self.path else {
                    return Err(e.into());
                };
                warn!("Database connection failed ({}), reconnecting", e);
                *conn = Connection::open(path)
                    .with_context(|| format!("failed to reopen database {}", path.display()))?;
                Ok(op(&*conn)?)
            }
            other => Ok(other?),
        }
    }
}

fn is_connectivity_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn download_request_from_row(row: &Row) -> rusqlite::Result<DownloadRequest> {
    let tracks_json: String = row.get(10)?;
    let track_metadata: Vec<TrackProgress> = serde_json::from_str(&tracks_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DownloadRequest {
        id: row.get(0)?,
        source_url: row.get(1)?,
        name: row.get(2)?,
        kind: row
            .get::<_, Option<String>>(3)?
            .and_then(|s| ObjectKind::parse(&s)),
        active: row.get(4)?,
        errored: row.get(5)?,
        sync_count: row.get(6)?,
        retry_count: row.get(7)?,
        expected_track_count: row.get(8)?,
        found_track_count: row.get(9)?,
        track_metadata,
        created_at: from_millis(row.get(11)?),
        updated_at: from_millis(row.get(12)?),
    })
}

fn playlist_request_from_row(row: &Row) -> rusqlite::Result<PlaylistRequest> {
    Ok(PlaylistRequest {
        id: row.get(0)?,
        source_url: row.get(1)?,
        no_pull: row.get(2)?,
        active: row.get(3)?,
        errored: row.get(4)?,
        retry_count: row.get(5)?,
        created_at: from_millis(row.get(6)?),
    })
}

fn music_file_from_row(row: &Row) -> rusqlite::Result<MusicFile> {
    let metadata: String = row.get(4)?;
    Ok(MusicFile {
        id: row.get(0)?,
        artist: row.get(1)?,
        title: row.get(2)?,
        path: row.get(3)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: from_millis(row.get(5)?),
    })
}

impl RequestStore for Database {
    fn list_active_download_requests(&self) -> Result<Vec<DownloadRequest>> {
        let sql = format!(
            "SELECT {} FROM download_requests WHERE active = 1 ORDER BY created_at ASC, rowid ASC",
            DOWNLOAD_REQUEST_COLUMNS
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let requests = stmt
                .query_map([], download_request_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(requests)
        })
    }

    fn get_active_download_request(&self, url: &str) -> Result<Option<DownloadRequest>> {
        let sql = format!(
            "SELECT {} FROM download_requests WHERE source_url = ?1 AND active = 1 \
             ORDER BY created_at ASC LIMIT 1",
            DOWNLOAD_REQUEST_COLUMNS
        );

        self.with_conn(|conn| {
            conn.query_row(&sql, [url], download_request_from_row)
                .optional()
        })
    }

    fn is_request_synced(&self, url: &str) -> Result<bool> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM download_requests WHERE source_url = ?1 AND active = 0",
                [url],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    fn insert_download_request(&self, request: &DownloadRequest) -> Result<()> {
        let tracks = serde_json::to_string(&request.track_metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO download_requests (
                    id, source_url, name, object_kind, active, errored,
                    sync_count, retry_count, expected_track_count, found_track_count,
                    track_metadata, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                rusqlite::params![
                    request.id,
                    request.source_url,
                    request.name,
                    request.kind.map(|k| k.as_str()),
                    request.active,
                    request.errored,
                    request.sync_count,
                    request.retry_count,
                    request.expected_track_count,
                    request.found_track_count,
                    tracks,
                    to_millis(&request.created_at),
                    to_millis(&request.updated_at),
                ],
            )
        })?;

        Ok(())
    }

    fn update_download_request(&self, request: &DownloadRequest) -> Result<()> {
        let tracks = serde_json::to_string(&request.track_metadata)?;

        let updated = self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE download_requests SET
                    name = ?2, object_kind = ?3, active = ?4, errored = ?5,
                    sync_count = ?6, retry_count = ?7, expected_track_count = ?8,
                    found_track_count = ?9, track_metadata = ?10, updated_at = ?11
                WHERE id = ?1
                "#,
                rusqlite::params![
                    request.id,
                    request.name,
                    request.kind.map(|k| k.as_str()),
                    request.active,
                    request.errored,
                    request.sync_count,
                    request.retry_count,
                    request.expected_track_count,
                    request.found_track_count,
                    tracks,
                    to_millis(&request.updated_at),
                ],
            )
        })?;

        if updated == 0 {
            bail!("download request {} not found", request.id);
        }
        Ok(())
    }

    fn list_active_playlist_requests(&self) -> Result<Vec<PlaylistRequest>> {
        let sql = format!(
            "SELECT {} FROM playlist_requests WHERE active = 1 ORDER BY created_at ASC, rowid ASC",
            PLAYLIST_REQUEST_COLUMNS
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let playlists = stmt
                .query_map([], playlist_request_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(playlists)
        })
    }

    fn insert_playlist_request(&self, request: &PlaylistRequest) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO playlist_requests (
                    id, source_url, no_pull, active, errored, retry_count, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                rusqlite::params![
                    request.id,
                    request.source_url,
                    request.no_pull,
                    request.active,
                    request.errored,
                    request.retry_count,
                    to_millis(&request.created_at),
                ],
            )
        })?;

        Ok(())
    }

    fn update_playlist_request(&self, request: &PlaylistRequest) -> Result<()> {
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE playlist_requests SET active = ?2, errored = ?3, retry_count = ?4 WHERE id = ?1",
                rusqlite::params![
                    request.id,
                    request.active,
                    request.errored,
                    request.retry_count
                ],
            )
        })?;

        if updated == 0 {
            bail!("playlist request {} not found", request.id);
        }
        Ok(())
    }

    fn get_index_status(&self) -> Result<IndexStatus> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT last_updated, last_indexed FROM index_status WHERE id = 1",
                [],
                |row| {
                    Ok(IndexStatus {
                        last_updated: from_millis(row.get(0)?),
                        last_indexed: from_millis(row.get(1)?),
                    })
                },
            )
        })
    }

    fn update_index_status(&self, status: &IndexStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE index_status SET last_updated = ?1, last_indexed = ?2 WHERE id = 1",
                rusqlite::params![
                    to_millis(&status.last_updated),
                    to_millis(&status.last_indexed)
                ],
            )
        })?;

        Ok(())
    }
}

impl CatalogStore for Database {
    fn find_music_files(&self, artists: &[String], titles: &[String]) -> Result<Vec<MusicFile>> {
        if artists.len() != titles.len() {
            bail!(
                "artist and title lists differ in length ({} vs {})",
                artists.len(),
                titles.len()
            );
        }

        let mut seen_pairs = HashSet::new();
        let pairs: Vec<(String, String)> = artists
            .iter()
            .zip(titles)
            .map(|(artist, title)| (matching::normalize(artist), matching::normalize(title)))
            .filter(|pair| seen_pairs.insert(pair.clone()))
            .collect();

        debug!("Looking up {} artist/title pairs in the catalog", pairs.len());

        let mut seen_files = HashSet::new();
        let mut files = Vec::new();

        for chunk in pairs.chunks(LOOKUP_CHUNK) {
            let conditions = vec!["(artist_key = ? AND title_key = ?)"; chunk.len()].join(" OR ");
            let sql = format!(
                "SELECT id, artist, title, path, metadata, created_at FROM music_files \
                 WHERE {} ORDER BY created_at ASC, rowid ASC",
                conditions
            );
            let params: Vec<&str> = chunk
                .iter()
                .flat_map(|(artist, title)| [artist.as_str(), title.as_str()])
                .collect();

            let found = self.with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), music_file_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })?;

            for file in found {
                if seen_files.insert(file.id.clone()) {
                    files.push(file);
                }
            }
        }

        Ok(files)
    }

    #[cfg(test)]
    fn insert_music_file(&self, file: &MusicFile) -> Result<()> {
        let metadata = serde_json::to_string(&file.metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO music_files (
                    id, artist, title, artist_key, title_key, path, metadata, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                rusqlite::params![
                    file.id,
                    file.artist,
                    file.title,
                    matching::normalize(&file.artist),
                    matching::normalize(&file.title),
                    file.path,
                    metadata,
                    to_millis(&file.created_at),
                ],
            )
        })?;

        Ok(())
    }
}
