use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    audio::encoder::{FrameEncoder, PCM_FRAME_BYTES},
    error::MusicError,
    voice::VoiceLink,
};

/// How one track's streaming attempt ended.
#[derive(Debug)]
pub enum PlaybackOutcome {
    /// The decoder output reached its end.
    Finished,
    /// The track's cancellation token fired (skip or stop).
    Skipped,
    Failed(MusicError),
}

impl PlaybackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackOutcome::Finished => "finished",
            PlaybackOutcome::Skipped => "skipped",
            PlaybackOutcome::Failed(_) => "failed",
        }
    }
}

/// Hot loop: PCM frame → Opus → voice link, until the stream ends, the token
/// is cancelled or something breaks.
///
/// While `pause` holds `true` the loop neither reads nor sends; it waits for
/// the flag to clear, for cancellation, or for `max_pause` to run out.
pub async fn drive<R>(
    pcm: &mut R,
    encoder: &mut FrameEncoder,
    link: &dyn VoiceLink,
    pause: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
    max_pause: Duration,
) -> PlaybackOutcome
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = [0u8; PCM_FRAME_BYTES];
    let mut frames_sent: u64 = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            break PlaybackOutcome::Skipped;
        }

        if let Some(outcome) = wait_while_paused(pause, cancel, max_pause).await {
            break outcome;
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PlaybackOutcome::Skipped,
            read = pcm.read_exact(&mut frame) => read,
        };

        match read {
            Ok(_) => {}
            // Un frame incompleto al final se descarta
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break PlaybackOutcome::Finished,
            Err(e) => break PlaybackOutcome::Failed(MusicError::StreamRead(e)),
        }

        let packet = match encoder.encode(&frame) {
            Ok(packet) => packet,
            Err(e) => break PlaybackOutcome::Failed(e),
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PlaybackOutcome::Skipped,
            sent = link.send(packet) => sent,
        };

        if let Err(e) = sent {
            break PlaybackOutcome::Failed(e);
        }
        frames_sent += 1;
    };

    match &outcome {
        PlaybackOutcome::Failed(e) => warn!("⚠️ Reproducción interrumpida tras {} frames: {}", frames_sent, e),
        other => debug!("⏹️ Driver terminó ({}) tras {} frames", other.label(), frames_sent),
    }

    outcome
}

async fn wait_while_paused(
    pause: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
    max_pause: Duration,
) -> Option<PlaybackOutcome> {
    let deadline = Instant::now() + max_pause;

    loop {
        let paused = *pause.borrow_and_update();
        if !paused {
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Some(PlaybackOutcome::Skipped),
            changed = pause.changed() => {
                if changed.is_err() {
                    // Sin emisor ya nadie puede reanudar
                    return None;
                }
            }
            _ = sleep_until(deadline) => {
                return Some(PlaybackOutcome::Failed(MusicError::PauseLimit(max_pause)));
            }
        }
    }
}
