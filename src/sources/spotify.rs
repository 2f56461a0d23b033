//! Spotify Web API, client-credentials flow. Only used to turn track and
//! playlist links into "artist - title" searches; audio always comes from
//! yt-dlp.

use serde::Deserialize;
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};
use url::Url;

use crate::error::{MusicError, MusicResult};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";
const PAGE_SIZE: usize = 100;

/// Extrae el ID de `open.spotify.com/<kind>/<id>` (con o sin prefijo de idioma)
pub fn spotify_id(url: &Url, kind: &str) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == kind)?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpotifyArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpotifyTrack {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub duration_ms: u64,
}

impl SpotifyTrack {
    pub fn search_query(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} - {}", artist.name, self.name),
            None => self.name.clone(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PlaylistPage {
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    // null para pistas locales o eliminadas
    track: Option<SpotifyTrack>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> MusicResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MusicError::Resolver(format!("token de Spotify: {e}")))?
            .json()
            .await
            .map_err(|e| MusicError::Resolver(format!("token de Spotify: {e}")))?;

        // Renovar un minuto antes de que expire
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> MusicResult<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MusicError::Resolver(format!("Spotify: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MusicError::NotFound(url.to_string()));
        }

        response
            .error_for_status()
            .map_err(|e| MusicError::Resolver(format!("Spotify: {e}")))?
            .json()
            .await
            .map_err(|e| MusicError::Resolver(format!("respuesta de Spotify inválida: {e}")))
    }

    pub async fn track(&self, id: &str) -> MusicResult<SpotifyTrack> {
        let track: SpotifyTrack = self.get(&format!("{API_URL}/tracks/{id}")).await?;
        info!("🟢 Spotify: {}", track.search_query());
        Ok(track)
    }

    /// Pistas de una playlist, siguiendo la paginación hasta `limit`
    pub async fn playlist_tracks(&self, id: &str, limit: usize) -> MusicResult<Vec<SpotifyTrack>> {
        let mut tracks = Vec::new();
        let mut next = Some(format!(
            "{API_URL}/playlists/{id}/tracks?limit={}",
            PAGE_SIZE.min(limit.max(1))
        ));

        while let Some(url) = next.take() {
            let page: PlaylistPage = self.get(&url).await?;
            tracks.extend(page.items.into_iter().filter_map(|item| item.track));
            if tracks.len() >= limit {
                break;
            }
            next = page.next;
        }

        tracks.truncate(limit);
        info!("🟢 Spotify: {} pistas en la playlist {}", tracks.len(), id);
        Ok(tracks)
    }
}
