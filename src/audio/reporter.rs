use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    audio::queue::{Track, TrackQueue},
    ui::{
        now_playing::render_progress,
        status::{MessageRef, StatusBoard},
    },
};

#[derive(Debug)]
struct ClockState {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

/// Wall clock of the current track minus every paused interval.
#[derive(Debug)]
pub struct PlaybackClock {
    state: Mutex<ClockState>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                started: Instant::now(),
                paused_at: None,
                paused_total: Duration::ZERO,
            }),
        }
    }

    /// Empieza de cero para una pista nueva
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.started = Instant::now();
        state.paused_at = None;
        state.paused_total = Duration::ZERO;
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.paused_at.take() {
            state.paused_total += since.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock();
        let now = Instant::now();
        let paused_now = state.paused_at.map_or(Duration::ZERO, |since| now - since);
        (now - state.started).saturating_sub(state.paused_total + paused_now)
    }
}

/// Everything one reporter instance needs. Built per track.
pub struct Reporter {
    pub board: Arc<dyn StatusBoard>,
    pub message: MessageRef,
    pub track: Track,
    pub queue: Arc<TrackQueue>,
    pub clock: Arc<PlaybackClock>,
    pub interval: Duration,
    pub preview_len: usize,
}

impl Reporter {
    /// Edits the now-playing message every `interval` until `cancel` fires.
    /// Ticks that land while paused are skipped, like the elapsed time itself.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if self.clock.is_paused() {
                    continue;
                }

                let upcoming = self.queue.snapshot();
                let message = render_progress(
                    &self.track,
                    self.clock.elapsed(),
                    &upcoming,
                    self.preview_len,
                    false,
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = self.board.edit(self.message, message) => {
                        if let Err(e) = result {
                            warn!("⚠️ No se pudo actualizar 'Now playing': {}", e);
                        }
                    }
                }
            }

            debug!("🛑 Reporter detenido para '{}'", self.track.title);
        })
    }
}
