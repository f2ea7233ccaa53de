//! Spotify Web API adapter (client-credentials flow)

use super::{MetadataError, MetadataProvider, PlaylistEntry, TrackInfo};
use crate::config::SpotifySettings;
use crate::db::ObjectKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Refresh the token this long before Spotify says it expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

const ALBUM_PAGE_SIZE: u32 = 50;
const PLAYLIST_PAGE_SIZE: u32 = 100;

/// A parsed `open.spotify.com` URL or `spotify:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyRef {
    pub kind: ObjectKind,
    pub id: String,
}

impl SpotifyRef {
    pub fn parse(input: &str) -> Result<Self, MetadataError> {
        let input = input.trim();
        let invalid = || MetadataError::InvalidUrl(input.to_string());

        if let Some(rest) = input.strip_prefix("spotify:") {
            let mut parts = rest.split(':');
            return match (parts.next(), parts.next()) {
                (Some(kind), Some(id)) if !id.is_empty() => Ok(Self {
                    kind: ObjectKind::parse(kind).ok_or_else(invalid)?,
                    id: id.to_string(),
                }),
                _ => Err(invalid()),
            };
        }

        let url = url::Url::parse(input).map_err(|_| invalid())?;
        if url.host_str() != Some("open.spotify.com") {
            return Err(invalid());
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        // Localised links look like /intl-de/track/{id}
        let segments = match segments.first() {
            Some(first) if first.starts_with("intl-") => &segments[1..],
            _ => &segments[..],
        };

        match segments {
            [kind, id, ..] => Ok(Self {
                kind: ObjectKind::parse(kind).ok_or_else(invalid)?,
                id: id.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    pub fn track_url(id: &str) -> String {
        format!("https://open.spotify.com/track/{}", id)
    }
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

impl From<ApiTrack> for TrackInfo {
    fn from(track: ApiTrack) -> Self {
        let id = track.id.unwrap_or_default();
        let url = if id.is_empty() {
            String::new()
        } else {
            SpotifyRef::track_url(&id)
        };

        TrackInfo {
            id,
            url,
            title: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
        }
    }
}

#[derive(Deserialize)]
struct ApiPlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

/// Spotify Web API client
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    accounts_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(settings: &SpotifySettings) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Tunesync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            accounts_url: settings.accounts_url.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, MetadataError> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|token| token.expires_at > Utc::now())
            .map(|token| token.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }

        debug!("Requesting a new Spotify access token");
        let response = self
            .http
            .post(&self.accounts_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body: TokenResponse = check_status(response, &self.accounts_url).await?.json().await?;

        let expires_at =
            Utc::now() + chrono::Duration::seconds(body.expires_in - TOKEN_REFRESH_MARGIN_SECS);
        *self.token.lock() = Some(AccessToken {
            value: body.access_token.clone(),
            expires_at,
        });

        Ok(body.access_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, MetadataError> {
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        Ok(check_status(response, url).await?.json().await?)
    }

    /// Collect every item of a paged listing by following `next` links
    async fn get_all_pages<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>, MetadataError> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url).await?;
            items.extend(page.items);
            next = page.next;
        }

        Ok(items)
    }

    fn endpoint(&self, path: &str, id: &str) -> String {
        format!("{}/{}/{}", self.api_base, path, urlencoding::encode(id))
    }

    async fn track(&self, id: &str) -> Result<TrackInfo, MetadataError> {
        let track: ApiTrack = self.get_json(&self.endpoint("tracks", id)).await?;
        Ok(track.into())
    }
}

async fn check_status(
    response: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, MetadataError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(MetadataError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(MetadataError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

#[async_trait]
impl MetadataProvider for SpotifyClient {
    async fn object_kind(&self, url: &str) -> Result<ObjectKind, MetadataError> {
        Ok(SpotifyRef::parse(url)?.kind)
    }

    async fn object_name(&self, url: &str) -> Result<String, MetadataError> {
        let target = SpotifyRef::parse(url)?;

        match target.kind {
            ObjectKind::Track => Ok(self.track(&target.id).await?.display_name()),
            ObjectKind::Album => {
                let album: Named = self.get_json(&self.endpoint("albums", &target.id)).await?;
                Ok(album.name)
            }
            ObjectKind::Playlist => {
                let url = format!("{}?fields=name", self.endpoint("playlists", &target.id));
                let playlist: Named = self.get_json(&url).await?;
                Ok(playlist.name)
            }
        }
    }

    async fn track_listing(&self, url: &str) -> Result<Vec<TrackInfo>, MetadataError> {
        let target = SpotifyRef::parse(url)?;

        match target.kind {
            ObjectKind::Track => Ok(vec![self.track(&target.id).await?]),
            ObjectKind::Album => {
                let first = format!(
                    "{}/tracks?limit={}",
                    self.endpoint("albums", &target.id),
                    ALBUM_PAGE_SIZE
                );
                let tracks: Vec<ApiTrack> = self.get_all_pages(first).await?;
                Ok(tracks.into_iter().map(TrackInfo::from).collect())
            }
            ObjectKind::Playlist => Ok(self
                .playlist_tracks(url)
                .await?
                .into_iter()
                .filter_map(|entry| entry.track)
                .collect()),
        }
    }

    async fn playlist_tracks(&self, url: &str) -> Result<Vec<PlaylistEntry>, MetadataError> {
        let target = SpotifyRef::parse(url)?;
        if target.kind != ObjectKind::Playlist {
            return Err(MetadataError::Unsupported(target.kind));
        }

        let first = format!(
            "{}/tracks?limit={}",
            self.endpoint("playlists", &target.id),
            PLAYLIST_PAGE_SIZE
        );
        let items: Vec<ApiPlaylistItem> = self.get_all_pages(first).await?;

        Ok(items
            .into_iter()
            .map(|item| PlaylistEntry {
                track: item.track.map(TrackInfo::from),
            })
            .collect())
    }
}
