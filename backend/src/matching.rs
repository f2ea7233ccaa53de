//! Matching keys: how a desired (artist, title) pair is compared against the catalog.
//!
//! A key is the lowercased artist credit, one space, and the lowercased title.
//! Nothing else is normalized: diacritics, punctuation and "feat." variants
//! must agree exactly after case folding or the track is reported missing.
//!
//! Multi-artist tracks are credited as `"First, Second"`. The catalog may hold
//! them under the first artist only, so every lookup tries the full credit
//! first and then falls back to the first credited artist. Callers holding the
//! provider's artist list pass its first entry; stored credits are split on
//! the separator, which misreads artists whose name contains it.

use crate::db::MusicFile;
use std::collections::HashMap;

/// Separator between credited artists
pub const ARTIST_SEPARATOR: &str = ", ";

pub fn normalize(value: &str) -> String {
    value.to_lowercase()
}

/// Comparison key for an (artist, title) pair
pub fn key(artist: &str, title: &str) -> String {
    format!("{} {}", normalize(artist), normalize(title))
}

/// First credited artist of a comma-joined credit
pub fn primary_artist(artist: &str) -> &str {
    artist
        .split(ARTIST_SEPARATOR)
        .next()
        .map(str::trim)
        .unwrap_or(artist)
}

pub fn join_artists<S: AsRef<str>>(artists: &[S]) -> String {
    artists
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(ARTIST_SEPARATOR)
}

/// Keys to try for one desired track, most specific first
pub fn candidate_keys(artist: &str, title: &str) -> Vec<String> {
    credited_keys(artist, primary_artist(artist), title)
}

/// [`candidate_keys`] with the first artist given explicitly
pub fn credited_keys(credit: &str, primary: &str, title: &str) -> Vec<String> {
    let full = key(credit, title);
    let fallback = key(primary, title);
    if fallback == full {
        vec![full]
    } else {
        vec![full, fallback]
    }
}

/// Parallel (artists, titles) arrays covering every candidate key of every
/// (credit, first artist, title) triple, ready for one batched catalog lookup
pub fn lookup_pairs<'a, I>(tracks: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
{
    let mut artists = Vec::new();
    let mut titles = Vec::new();

    for (artist, primary, title) in tracks {
        artists.push(normalize(artist));
        titles.push(normalize(title));

        if normalize(primary) != normalize(artist) {
            artists.push(normalize(primary));
            titles.push(normalize(title));
        }
    }

    (artists, titles)
}

/// Catalog entries indexed by matching key
#[derive(Debug, Default)]
pub struct CatalogIndex {
    by_key: HashMap<String, MusicFile>,
}

impl CatalogIndex {
    /// Build from lookup results. The first entry for a key wins.
    pub fn new(files: Vec<MusicFile>) -> Self {
        let mut by_key = HashMap::with_capacity(files.len());
        for file in files {
            by_key.entry(key(&file.artist, &file.title)).or_insert(file);
        }
        Self { by_key }
    }

    /// Resolve a desired track, trying the full credit and then the first artist
    pub fn resolve(&self, artist: &str, title: &str) -> Option<&MusicFile> {
        self.first_hit(candidate_keys(artist, title))
    }

    /// Resolve with the first artist given explicitly
    pub fn resolve_credited(&self, credit: &str, primary: &str, title: &str) -> Option<&MusicFile> {
        self.first_hit(credited_keys(credit, primary, title))
    }

    fn first_hit(&self, keys: Vec<String>) -> Option<&MusicFile> {
        keys.iter().find_map(|k| self.by_key.get(k))
    }

    pub fn contains(&self, artist: &str, title: &str) -> bool {
        self.resolve(artist, title).is_some()
    }
}
