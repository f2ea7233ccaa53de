//! Minimal M3U output: one path per line, no `#EXTM3U` header

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Subdirectory of the playlists root that holds the files
pub const PLAYLISTS_DIR: &str = "Playlists";

#[derive(Debug, Error)]
pub enum M3uError {
    #[error("playlist file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name for a playlist; path separators in the name become dashes
pub fn playlist_file_name(name: &str) -> String {
    format!("{}.m3u", name.replace('/', "-"))
}

pub fn playlist_path(root: &Path, name: &str) -> PathBuf {
    root.join(PLAYLISTS_DIR).join(playlist_file_name(name))
}

/// Write `{root}/Playlists/{name}.m3u`. Playlist files are write-once: an
/// existing file is left untouched and reported as [`M3uError::AlreadyExists`].
pub fn create_m3u_playlist(root: &Path, name: &str, paths: &[String]) -> Result<PathBuf, M3uError> {
    let path = playlist_path(root, name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(M3uError::AlreadyExists(path)),
        Err(e) => return Err(e.into()),
    };

    let mut writer = BufWriter::new(file);
    for entry in paths {
        writeln!(writer, "{}", entry)?;
    }
    writer.flush()?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_replaces_separators() {
        assert_eq!(playlist_file_name("Rock/Pop: 90s"), "Rock-Pop: 90s.m3u");
    }

    #[test]
    fn test_writes_one_line_per_path_in_order() {
        let dir = TempDir::new().unwrap();
        let paths = vec!["/music/b.mp3".to_string(), "/music/a.mp3".to_string()];

        let path = create_m3u_playlist(dir.path(), "Mix", &paths).unwrap();

        assert_eq!(path, dir.path().join("Playlists").join("Mix.m3u"));
        assert_eq!(fs::read_to_string(path).unwrap(), "/music/b.mp3\n/music/a.mp3\n");
    }

    #[test]
    fn test_existing_file_is_not_modified() {
        let dir = TempDir::new().unwrap();
        create_m3u_playlist(dir.path(), "Mix", &["/music/first.mp3".to_string()]).unwrap();

        let err = create_m3u_playlist(dir.path(), "Mix", &["/music/second.mp3".to_string()])
            .unwrap_err();

        assert!(matches!(err, M3uError::AlreadyExists(_)));
        let content = fs::read_to_string(playlist_path(dir.path(), "Mix")).unwrap();
        assert_eq!(content, "/music/first.mp3\n");
    }

    #[test]
    fn test_empty_playlist_writes_empty_file() {
        let dir = TempDir::new().unwrap();

        let path = create_m3u_playlist(dir.path(), "Empty", &[]).unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "");
    }
}
