//! Track resolution.
//!
//! Turns whatever the user typed into playable tracks. Metadata is resolved
//! when the command arrives; the actual stream URL is only extracted right
//! before a track starts, since those URLs expire.

pub mod spotify;
pub mod ytdlp;

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::{
    config::Config,
    error::{MusicError, MusicResult},
};

pub use spotify::SpotifyClient;
pub use ytdlp::YtDlp;

/// Resultado de resolver una consulta: metadata sin URL de stream
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub url: String,
    pub title: String,
    pub duration: Option<Duration>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolves a text search, a URL or a playlist into one or more tracks.
    /// Never returns an empty list: nothing found is `MusicError::NotFound`.
    async fn resolve(&self, query: &str) -> MusicResult<Vec<ResolvedTrack>>;

    /// Extracts the direct audio stream URL for a track locator.
    async fn stream_url(&self, locator: &str) -> MusicResult<String>;
}

/// Qué tipo de consulta escribió el usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    SpotifyTrack(String),
    SpotifyPlaylist(String),
    Playlist(String),
    Url(String),
    Search(String),
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        let query = query.trim();

        let Ok(url) = Url::parse(query) else {
            return Self::Search(query.to_string());
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Self::Search(query.to_string());
        }

        let host = url.host_str().unwrap_or_default();
        if host.ends_with("spotify.com") {
            if let Some(id) = spotify::spotify_id(&url, "track") {
                return Self::SpotifyTrack(id);
            }
            if let Some(id) = spotify::spotify_id(&url, "playlist") {
                return Self::SpotifyPlaylist(id);
            }
        }

        let is_youtube_playlist = (host.ends_with("youtube.com") && url.path() == "/playlist")
            || (host.ends_with("youtube.com")
                && url.query_pairs().any(|(k, _)| k == "list")
                && !url.query_pairs().any(|(k, _)| k == "v"));
        let is_soundcloud_set = host.ends_with("soundcloud.com") && url.path().contains("/sets/");

        if is_youtube_playlist || is_soundcloud_set {
            Self::Playlist(query.to_string())
        } else {
            Self::Url(query.to_string())
        }
    }
}

/// Resolvedor de producción: yt-dlp para todo, Spotify solo para metadata
pub struct SourceRouter {
    ytdlp: YtDlp,
    spotify: Option<SpotifyClient>,
    max_playlist_size: usize,
}

impl SourceRouter {
    pub fn new(config: &Config) -> Self {
        let spotify = config
            .spotify_credentials()
            .map(|(id, secret)| SpotifyClient::new(id.to_string(), secret.to_string()));

        if spotify.is_some() {
            info!("🟢 Resolución de enlaces de Spotify activada");
        }

        Self {
            ytdlp: YtDlp::new(config),
            spotify,
            max_playlist_size: config.max_playlist_size,
        }
    }

    fn spotify(&self) -> MusicResult<&SpotifyClient> {
        self.spotify
            .as_ref()
            .ok_or_else(|| MusicError::Resolver("Spotify no está configurado".to_string()))
    }

    /// Busca en YouTube "artista - título" y conserva la metadata de Spotify
    async fn find_on_youtube(&self, track: &spotify::SpotifyTrack) -> MusicResult<ResolvedTrack> {
        let query = track.search_query();
        let found = self
            .ytdlp
            .search(&query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::NotFound(query.clone()))?;

        Ok(ResolvedTrack {
            url: found.url,
            title: query,
            duration: Some(track.duration()),
        })
    }
}

#[async_trait]
impl MediaResolver for SourceRouter {
    async fn resolve(&self, query: &str) -> MusicResult<Vec<ResolvedTrack>> {
        let tracks = match QueryKind::classify(query) {
            QueryKind::Search(text) => self.ytdlp.search(&text, 1).await?,
            QueryKind::Url(url) => self.ytdlp.info(&url).await?.into_iter().collect(),
            QueryKind::Playlist(url) => self.ytdlp.playlist(&url, self.max_playlist_size).await?,
            QueryKind::SpotifyTrack(id) => {
                let track = self.spotify()?.track(&id).await?;
                vec![self.find_on_youtube(&track).await?]
            }
            QueryKind::SpotifyPlaylist(id) => {
                let tracks = self
                    .spotify()?
                    .playlist_tracks(&id, self.max_playlist_size)
                    .await?;

                // El semáforo de yt-dlp limita la concurrencia real
                let found = join_all(tracks.iter().map(|t| self.find_on_youtube(t))).await;
                found
                    .into_iter()
                    .filter_map(|result| match result {
                        Ok(track) => Some(track),
                        Err(e) => {
                            warn!("⚠️ Pista de Spotify sin equivalente en YouTube: {}", e);
                            None
                        }
                    })
                    .collect()
            }
        };

        if tracks.is_empty() {
            return Err(MusicError::NotFound(query.to_string()));
        }
        Ok(tracks)
    }

    async fn stream_url(&self, locator: &str) -> MusicResult<String> {
        self.ytdlp.stream_url(locator).await
    }
}
