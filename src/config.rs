use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

/// Perfil de libopus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OpusApplication {
    Audio,
    Voip,
    LowDelay,
}

impl FromStr for OpusApplication {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "voip" => Ok(Self::Voip),
            "lowdelay" | "low_delay" => Ok(Self::LowDelay),
            other => anyhow::bail!("Aplicación Opus desconocida: {}", other),
        }
    }
}

impl From<OpusApplication> for audiopus::Application {
    fn from(app: OpusApplication) -> Self {
        match app {
            OpusApplication::Audio => audiopus::Application::Audio,
            OpusApplication::Voip => audiopus::Application::Voip,
            OpusApplication::LowDelay => audiopus::Application::LowDelay,
        }
    }
}

/// Settings the per-session frame encoder is configured with, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OpusSettings {
    pub bitrate: i32,
    pub application: OpusApplication,
    /// 0-10
    pub complexity: u8,
    pub inband_fec: bool,
    /// Pérdida esperada en %, 0-100
    pub packet_loss_perc: u8,
    pub dtx: bool,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Config::default().opus()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum QualityPreset {
    Performance,
    Balanced,
    Quality,
}

impl FromStr for QualityPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "performance" => Ok(Self::Performance),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => anyhow::bail!("Preset de calidad desconocido: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Logging
    pub log_file: Option<PathBuf>,

    // Herramientas externas
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub cookies_path: Option<PathBuf>,
    pub ytdlp_proxy: Option<String>,
    pub ytdlp_auto_update: bool,
    pub ytdlp_update_command: String,

    // Spotify (opcional)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Opus
    pub opus_bitrate: i32,
    pub opus_application: OpusApplication,
    pub opus_complexity: u8,
    pub opus_inband_fec: bool,
    pub opus_packet_loss_perc: u8,
    pub opus_dtx: bool,

    // Cadena de filtros de audio
    pub audio_volume: f64,
    pub audio_normalization: bool,
    pub audio_compressor: bool,
    pub compressor_threshold_db: f64,
    pub compressor_ratio: f64,
    pub compressor_attack_ms: u32,
    pub compressor_release_ms: u32,
    pub enable_resampling: bool,
    pub resampling_quality: u32,

    // FFmpeg
    pub ffmpeg_reconnect_delay: u32,

    pub quality_preset: QualityPreset,

    // Sesión
    pub inactivity_timeout: Duration,
    pub now_playing_interval: Duration,
    pub queue_preview_len: usize,
    pub max_pause: Duration,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN no configurado"))?,
            guild_id: optional_env("GUILD_ID").and_then(|s| s.parse().ok()),

            log_file: optional_env("LOG_FILE").map(PathBuf::from),

            ytdlp_path: env_or("YTDLP_PATH", "yt-dlp".to_string()),
            ffmpeg_path: env_or("FFMPEG_PATH", "ffmpeg".to_string()),
            cookies_path: optional_env("COOKIES_PATH").map(PathBuf::from),
            ytdlp_proxy: optional_env("YT_DLP_PROXY"),
            ytdlp_auto_update: env_or("YTDLP_AUTO_UPDATE", false),
            ytdlp_update_command: env_or(
                "YTDLP_UPDATE_COMMAND",
                "pipx upgrade --pip-args=--pre yt-dlp".to_string(),
            ),

            spotify_client_id: optional_env("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: optional_env("SPOTIFY_CLIENT_SECRET"),

            // Opus (128kbps es el máximo de Discord sin boost)
            opus_bitrate: env_or("OPUS_BITRATE", 128_000),
            opus_application: env_or("OPUS_APPLICATION", OpusApplication::Audio),
            opus_complexity: env_or("OPUS_COMPLEXITY", 10),
            opus_inband_fec: env_or("OPUS_INBAND_FEC", true),
            opus_packet_loss_perc: env_or("OPUS_PACKET_LOSS_PERC", 15),
            // DTX corta la transmisión en silencios, mal para música
            opus_dtx: env_or("OPUS_DTX", false),

            audio_volume: env_or("AUDIO_VOLUME", 1.0),
            audio_normalization: env_or("AUDIO_NORMALIZATION", true),
            audio_compressor: env_or("AUDIO_COMPRESSOR", true),
            compressor_threshold_db: env_or("COMPRESSOR_THRESHOLD", -20.0),
            compressor_ratio: env_or("COMPRESSOR_RATIO", 4.0),
            compressor_attack_ms: env_or("COMPRESSOR_ATTACK", 5),
            compressor_release_ms: env_or("COMPRESSOR_RELEASE", 50),
            enable_resampling: env_or("ENABLE_RESAMPLING", true),
            resampling_quality: env_or("RESAMPLING_QUALITY", 28),

            ffmpeg_reconnect_delay: env_or("FFMPEG_RECONNECT_DELAY", 5),

            quality_preset: env_or("QUALITY_PRESET", QualityPreset::Balanced),

            inactivity_timeout: Duration::from_secs(env_or("INACTIVITY_TIMEOUT_SECS", 30)),
            now_playing_interval: Duration::from_millis(env_or("NOW_PLAYING_INTERVAL_MS", 1000)),
            queue_preview_len: env_or("QUEUE_PREVIEW_LEN", 5),
            max_pause: Duration::from_secs(env_or("MAX_PAUSE_SECS", 900)),
            max_queue_size: env_or("MAX_QUEUE_SIZE", 1000),
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", 100),
        };

        config.apply_preset(|key| std::env::var_os(key).is_some());
        config.validate();

        Ok(config)
    }

    /// Applies the quality preset to every value the environment did not set
    /// explicitly. `is_set` tells whether a variable was provided.
    pub fn apply_preset(&mut self, is_set: impl Fn(&str) -> bool) {
        match self.quality_preset {
            QualityPreset::Performance => {
                if !is_set("OPUS_COMPLEXITY") {
                    self.opus_complexity = 6;
                }
                if !is_set("ENABLE_RESAMPLING") {
                    self.enable_resampling = false;
                }
                if !is_set("AUDIO_COMPRESSOR") {
                    self.audio_compressor = false;
                }
            }
            QualityPreset::Quality => {
                if !is_set("RESAMPLING_QUALITY") {
                    self.resampling_quality = 33;
                }
            }
            QualityPreset::Balanced => {}
        }
    }

    /// Brings out-of-range values back to their defaults, with a warning.
    pub fn validate(&mut self) {
        if !(12_000..=128_000).contains(&self.opus_bitrate) {
            warn!(
                "⚠️ OPUS_BITRATE {} fuera del rango de Discord (12000-128000), usando 128000",
                self.opus_bitrate
            );
            self.opus_bitrate = 128_000;
        }

        if self.opus_complexity > 10 {
            warn!("⚠️ OPUS_COMPLEXITY {} fuera de rango (0-10), usando 10", self.opus_complexity);
            self.opus_complexity = 10;
        }

        if self.opus_packet_loss_perc > 100 {
            warn!(
                "⚠️ OPUS_PACKET_LOSS_PERC {} fuera de rango (0-100), usando 15",
                self.opus_packet_loss_perc
            );
            self.opus_packet_loss_perc = 15;
        }

        if !(0.0..=10.0).contains(&self.audio_volume) {
            warn!("⚠️ AUDIO_VOLUME {:.2} fuera de rango (0.0-10.0), usando 1.0", self.audio_volume);
            self.audio_volume = 1.0;
        }

        if self.compressor_threshold_db > 0.0 {
            warn!(
                "⚠️ COMPRESSOR_THRESHOLD {:.2} debe ser negativo (dB), usando -20.0",
                self.compressor_threshold_db
            );
            self.compressor_threshold_db = -20.0;
        }

        if !(1.0..=20.0).contains(&self.compressor_ratio) {
            warn!("⚠️ COMPRESSOR_RATIO {:.2} fuera de rango (1.0-20.0), usando 4.0", self.compressor_ratio);
            self.compressor_ratio = 4.0;
        }

        if !(16..=33).contains(&self.resampling_quality) {
            warn!(
                "⚠️ RESAMPLING_QUALITY {} fuera del rango de SoX (16-33), usando 28",
                self.resampling_quality
            );
            self.resampling_quality = 28;
        }

        if !(1..=60).contains(&self.ffmpeg_reconnect_delay) {
            warn!(
                "⚠️ FFMPEG_RECONNECT_DELAY {} fuera de rango (1-60), usando 5",
                self.ffmpeg_reconnect_delay
            );
            self.ffmpeg_reconnect_delay = 5;
        }

        if self.queue_preview_len == 0 {
            warn!("⚠️ QUEUE_PREVIEW_LEN no puede ser 0, usando 5");
            self.queue_preview_len = 5;
        }

        if self.now_playing_interval < Duration::from_millis(250) {
            warn!("⚠️ NOW_PLAYING_INTERVAL_MS demasiado bajo, usando 1000");
            self.now_playing_interval = Duration::from_secs(1);
        }

        if self.max_queue_size == 0 {
            warn!("⚠️ MAX_QUEUE_SIZE no puede ser 0, usando 1000");
            self.max_queue_size = 1000;
        }

        if self.max_playlist_size == 0 {
            warn!("⚠️ MAX_PLAYLIST_SIZE no puede ser 0, usando 100");
            self.max_playlist_size = 100;
        }
    }

    pub fn opus(&self) -> OpusSettings {
        OpusSettings {
            bitrate: self.opus_bitrate,
            application: self.opus_application,
            complexity: self.opus_complexity,
            inband_fec: self.opus_inband_fec,
            packet_loss_perc: self.opus_packet_loss_perc,
            dtx: self.opus_dtx,
        }
    }

    /// Builds the ffmpeg `-af` filter chain: resampler, compressor,
    /// loudness normalization, volume. `None` when every stage is off.
    pub fn audio_filter(&self) -> Option<String> {
        let mut filters = Vec::new();

        if self.enable_resampling {
            filters.push(format!(
                "aresample=resampler=soxr:precision={}:dither_method=triangular",
                self.resampling_quality
            ));
        }

        if self.audio_compressor {
            // acompressor espera amplitud lineal, no dB
            let threshold = 10f64.powf(self.compressor_threshold_db / 20.0);
            filters.push(format!(
                "acompressor=threshold={:.6}:ratio={:.1}:attack={}:release={}",
                threshold, self.compressor_ratio, self.compressor_attack_ms, self.compressor_release_ms
            ));
        }

        if self.audio_normalization {
            filters.push("loudnorm=I=-16:TP=-1.5:LRA=11".to_string());
        }

        if (self.audio_volume - 1.0).abs() > f64::EPSILON {
            filters.push(format!("volume={:.2}", self.audio_volume));
        }

        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and the Spotify secret.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: guild {}\n  \
            Opus: {}kbps, {:?}, complejidad {}, FEC {} ({}%), DTX {}\n  \
            Filtros: {}\n  \
            Sesión: inactividad {}s, refresco {}ms, pausa máx {}s, cola máx {}\n  \
            Spotify: {}",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.opus_bitrate / 1000,
            self.opus_application,
            self.opus_complexity,
            self.opus_inband_fec,
            self.opus_packet_loss_perc,
            self.opus_dtx,
            self.audio_filter().unwrap_or_else(|| "ninguno".to_string()),
            self.inactivity_timeout.as_secs(),
            self.now_playing_interval.as_millis(),
            self.max_pause.as_secs(),
            self.max_queue_size,
            if self.spotify_credentials().is_some() { "activado" } else { "desactivado" },
        )
    }

    pub fn spotify_credentials(&self) -> Option<(&str, &str)> {
        match (&self.spotify_client_id, &self.spotify_client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,
            log_file: None,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            cookies_path: None,
            ytdlp_proxy: None,
            ytdlp_auto_update: false,
            ytdlp_update_command: "pipx upgrade --pip-args=--pre yt-dlp".to_string(),
            spotify_client_id: None,
            spotify_client_secret: None,
            opus_bitrate: 128_000,
            opus_application: OpusApplication::Audio,
            opus_complexity: 10,
            opus_inband_fec: true,
            opus_packet_loss_perc: 15,
            opus_dtx: false,
            audio_volume: 1.0,
            audio_normalization: true,
            audio_compressor: true,
            compressor_threshold_db: -20.0,
            compressor_ratio: 4.0,
            compressor_attack_ms: 5,
            compressor_release_ms: 50,
            enable_resampling: true,
            resampling_quality: 28,
            ffmpeg_reconnect_delay: 5,
            quality_preset: QualityPreset::Balanced,
            inactivity_timeout: Duration::from_secs(30),
            now_playing_interval: Duration::from_secs(1),
            queue_preview_len: 5,
            max_pause: Duration::from_secs(900),
            max_queue_size: 1000,
            max_playlist_size: 100,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("⚠️ Valor inválido para {}: {:?}, usando el valor por defecto", key, raw);
            default
        }),
        None => default,
    }
}
