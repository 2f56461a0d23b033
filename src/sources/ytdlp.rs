use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};

use super::ResolvedTrack;
use crate::{
    config::Config,
    error::{MusicError, MusicResult},
};

/// Información extraída de `yt-dlp --dump-json`
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
}

impl YtDlpEntry {
    fn into_track(self) -> Option<ResolvedTrack> {
        let url = self
            .webpage_url
            .or(self.url)
            .or_else(|| self.id.as_ref().map(|id| format!("https://www.youtube.com/watch?v={id}")))?;

        let duration = match self.is_live {
            Some(true) => None,
            _ => self.duration.filter(|d| *d > 0.0).map(Duration::from_secs_f64),
        };

        Some(ResolvedTrack {
            title: self.title.unwrap_or_else(|| url.clone()),
            url,
            duration,
        })
    }
}

/// Parsea la salida JSON de yt-dlp (un objeto por línea)
pub fn parse_entries(stdout: &str) -> Vec<ResolvedTrack> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpEntry>(line) {
            Ok(entry) => entry.into_track(),
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}

/// Cliente para yt-dlp, con límite de procesos concurrentes
pub struct YtDlp {
    program: String,
    cookies: Option<PathBuf>,
    proxy: Option<String>,
    rate_limiter: Semaphore,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            cookies: config.cookies_path.clone(),
            proxy: config.ytdlp_proxy.clone(),
            // Limitar requests concurrentes para evitar rate limiting
            rate_limiter: Semaphore::new(3),
            timeout: Duration::from_secs(60),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-warnings")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(proxy) = &self.proxy {
            cmd.args(["--proxy", proxy]);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> MusicResult<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| MusicError::Resolver(e.to_string()))?;

        let mut cmd = self.command();
        cmd.args(args);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| MusicError::Resolver(format!("yt-dlp no respondió en {:?}", self.timeout)))?
            .map_err(|e| MusicError::Resolver(format!("Error al ejecutar yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló ({}): {}", output.status, error.trim());
            return Err(MusicError::Resolver(error.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Busca en YouTube y devuelve hasta `limit` resultados
    pub async fn search(&self, text: &str, limit: usize) -> MusicResult<Vec<ResolvedTrack>> {
        info!("🔍 Buscando en YouTube: {}", text);
        let query = format!("ytsearch{}:{}", limit.max(1), text);
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", "--no-playlist", &query])
            .await?;
        Ok(parse_entries(&stdout))
    }

    /// Metadata de una URL concreta
    pub async fn info(&self, url: &str) -> MusicResult<Option<ResolvedTrack>> {
        debug!("📊 Obteniendo info de: {}", url);
        let stdout = self.run(&["--dump-json", "--no-playlist", url]).await?;
        Ok(parse_entries(&stdout).into_iter().next())
    }

    /// Expande una playlist a lo sumo a `limit` entradas
    pub async fn playlist(&self, url: &str, limit: usize) -> MusicResult<Vec<ResolvedTrack>> {
        info!("📜 Expandiendo playlist: {}", url);
        let end = limit.to_string();
        let stdout = self
            .run(&["--dump-json", "--flat-playlist", "--playlist-end", &end, url])
            .await?;

        let mut tracks = parse_entries(&stdout);
        tracks.truncate(limit);
        Ok(tracks)
    }

    /// Obtiene la URL de streaming de audio
    pub async fn stream_url(&self, locator: &str) -> MusicResult<String> {
        debug!("🎵 Obteniendo URL de stream para: {}", locator);
        let stdout = self
            .run(&["--get-url", "-f", "bestaudio/best", "--no-playlist", locator])
            .await?;

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MusicError::Resolver("yt-dlp no devolvió URL de stream".to_string()))
    }

    pub async fn version(&self) -> MusicResult<String> {
        let stdout = self.run(&["--version"]).await?;
        Ok(stdout.trim().to_string())
    }
}
