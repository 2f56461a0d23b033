//! # Error taxonomy
//!
//! Every failure of the playback core is one of these variants. None of them
//! is fatal to the process: resolution and join errors go back to the user,
//! everything that happens while a track is playing ends that track and the
//! session advances to the next one (or goes idle).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MusicError {
    /// The query did not produce any playable track.
    #[error("no se encontró ninguna pista para `{0}`")]
    NotFound(String),

    /// The resolver tool (yt-dlp, Spotify API) failed.
    #[error("error del resolvedor: {0}")]
    Resolver(String),

    /// The external decoder could not be spawned or its pipes attached.
    #[error("no se pudo iniciar el decodificador: {0}")]
    PipelineStart(#[source] std::io::Error),

    /// The decoder output broke in the middle of a track.
    #[error("error leyendo PCM del decodificador: {0}")]
    StreamRead(#[source] std::io::Error),

    /// The voice channel could not be joined.
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),

    #[error("error codificando frame Opus: {0}")]
    Encode(#[from] audiopus::Error),

    /// The voice link refused a frame (connection gone).
    #[error("el enlace de voz rechazó el frame: {0}")]
    VoiceSend(String),

    /// The track stayed paused longer than the configured cap.
    #[error("pausa máxima de {0:?} excedida")]
    PauseLimit(Duration),

    /// Enqueuing would grow the queue past its configured bound.
    #[error("la cola está llena (máximo {0} pistas)")]
    QueueFull(usize),

    /// Posting or editing a status message failed.
    #[error("error actualizando el mensaje de estado: {0}")]
    Board(String),

    /// The session was torn down while the operation was in flight.
    #[error("la sesión ya fue cerrada")]
    SessionClosed,
}

impl MusicError {
    /// Errors caused by the user's request rather than by the bot.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MusicError::NotFound(_)
                | MusicError::Join(_)
                | MusicError::QueueFull(_)
                | MusicError::SessionClosed
        )
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;
