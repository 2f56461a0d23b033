//! # Guild session
//!
//! One object per guild owns everything playback needs: the voice link, the
//! queue, the track being played, the pause flag, the now-playing message and
//! the inactivity timer. All of it sits behind the session's own lock, so
//! there is no state shared between guilds.
//!
//! A session moves through these states:
//!
//! - **Idle**: no voice link yet (freshly created).
//! - **Connected-Idle**: link present, nothing playing, inactivity timer armed.
//! - **Playing** (and its **Paused** sub-state): a player task is pulling
//!   tracks off the queue one at a time.
//! - **Closed**: torn down and removed from the registry. Terminal.
//!
//! Each track gets its own [`CancellationToken`]. Skip and stop cancel it;
//! stream URL extraction, the driver, the reporter and the stderr drain all
//! observe it, and the decoder is killed and reaped before the next track's
//! decoder is started.

use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        driver::{drive, PlaybackOutcome},
        encoder::FrameEncoder,
        pipeline::{drain_diagnostics, Transcoder},
        queue::{Track, TrackQueue},
        reporter::{PlaybackClock, Reporter},
        registry::SessionMap,
    },
    config::{Config, OpusSettings},
    error::{MusicError, MusicResult},
    sources::MediaResolver,
    ui::{
        now_playing::{render_finished, render_progress, render_start, render_stopped},
        status::{MessageRef, StatusBoard},
    },
    voice::{VoiceGateway, VoiceLink},
};

const STREAM_ERROR_NOTICE: &str = "Error getting audio stream.";

/// Result of a command, rendered to text by the bot layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Nothing was playing; the first enqueued track starts now.
    Started { title: String, queued: usize },
    /// Tracks appended behind the current one, with their queue positions.
    Queued { entries: Vec<(usize, String)> },
    Skipped,
    NothingToSkip,
    Paused,
    Resumed,
    NothingPlaying,
    NotConnected,
    Stopped,
}

/// Valores de configuración que usa una sesión
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub opus: OpusSettings,
    pub inactivity_timeout: Duration,
    pub now_playing_interval: Duration,
    pub queue_preview_len: usize,
    pub max_pause: Duration,
    pub max_queue_size: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            opus: config.opus(),
            inactivity_timeout: config.inactivity_timeout,
            now_playing_interval: config.now_playing_interval,
            queue_preview_len: config.queue_preview_len,
            max_pause: config.max_pause,
            max_queue_size: config.max_queue_size,
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct PlaybackServices {
    pub gateway: Arc<dyn VoiceGateway>,
    pub resolver: Arc<dyn MediaResolver>,
    pub transcoder: Arc<dyn Transcoder>,
    pub board: Arc<dyn StatusBoard>,
    pub settings: Arc<SessionSettings>,
}

struct NowPlaying {
    track: Track,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    link: Option<Arc<dyn VoiceLink>>,
    current: Option<NowPlaying>,
    player: Option<JoinHandle<()>>,
    idle_timer: Option<CancellationToken>,
    message: Option<MessageRef>,
    closed: bool,
}

/// Lo que queda por liberar fuera del lock al cerrar la sesión
struct Teardown {
    link: Option<Arc<dyn VoiceLink>>,
    player: Option<JoinHandle<()>>,
    message: Option<MessageRef>,
    discarded: usize,
}

pub struct GuildSession {
    guild_id: GuildId,
    services: PlaybackServices,
    queue: Arc<TrackQueue>,
    clock: Arc<PlaybackClock>,
    pause: watch::Sender<bool>,
    encoder: Mutex<FrameEncoder>,
    state: Mutex<SessionState>,
    /// Canal de voz del link ya establecido; `None` mientras se une o se cierra
    connected: parking_lot::Mutex<Option<ChannelId>>,
    /// Se cancela cuando la sesión soltó el canal de voz y salió del registro
    released: CancellationToken,
    registry: Weak<SessionMap>,
}

impl GuildSession {
    pub fn new(
        guild_id: GuildId,
        services: PlaybackServices,
        registry: Weak<SessionMap>,
    ) -> MusicResult<Self> {
        let encoder = FrameEncoder::new(&services.settings.opus)?;
        let (pause, _) = watch::channel(false);

        Ok(Self {
            guild_id,
            services,
            queue: Arc::new(TrackQueue::new()),
            clock: Arc::new(PlaybackClock::new()),
            pause,
            encoder: Mutex::new(encoder),
            state: Mutex::new(SessionState::default()),
            connected: parking_lot::Mutex::new(None),
            released: CancellationToken::new(),
            registry,
        })
    }

    pub fn upcoming(&self) -> Vec<Track> {
        self.queue.snapshot()
    }

    pub fn connected_channel(&self) -> Option<ChannelId> {
        *self.connected.lock()
    }

    /// Resolves once a closed session has disconnected and left the registry.
    pub async fn released(&self) {
        self.released.cancelled().await
    }

    pub async fn now_playing(&self) -> Option<Track> {
        self.state.lock().await.current.as_ref().map(|c| c.track.clone())
    }

    /// Appends `tracks`, joining `voice_channel` first if there is no link
    /// yet, and starts the player when it is not running.
    pub async fn enqueue(
        self: &Arc<Self>,
        voice_channel: ChannelId,
        tracks: Vec<Track>,
    ) -> MusicResult<CommandOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(MusicError::SessionClosed);
        }

        let max = self.services.settings.max_queue_size;
        if self.queue.len() + tracks.len() > max {
            self.abandon_if_unused(&mut state);
            return Err(MusicError::QueueFull(max));
        }

        if state.link.is_none() {
            info!("🔊 Uniéndose al canal {} en guild {}", voice_channel, self.guild_id);
            match self.services.gateway.join(self.guild_id, voice_channel).await {
                Ok(link) => {
                    state.link = Some(link);
                    *self.connected.lock() = Some(voice_channel);
                }
                Err(e) => {
                    error!("❌ No se pudo unir al canal de voz en guild {}: {}", self.guild_id, e);
                    self.abandon_if_unused(&mut state);
                    return Err(e);
                }
            }
        }

        let first_position = self.queue.len() + 1;
        let titles: Vec<String> = tracks.iter().map(|t| t.title.clone()).collect();
        let Some(first_title) = titles.first().cloned() else {
            return Ok(CommandOutcome::Queued { entries: Vec::new() });
        };
        self.queue.enqueue_all(tracks);

        if let Some(timer) = state.idle_timer.take() {
            debug!("⏱️ Timer de inactividad cancelado en guild {}", self.guild_id);
            timer.cancel();
        }

        if state.player.is_none() {
            state.player = Some(self.spawn_player());
            return Ok(CommandOutcome::Started {
                title: first_title,
                queued: titles.len() - 1,
            });
        }

        Ok(CommandOutcome::Queued {
            entries: titles
                .into_iter()
                .enumerate()
                .map(|(i, title)| (first_position + i, title))
                .collect(),
        })
    }

    pub async fn skip(&self) -> CommandOutcome {
        let state = self.state.lock().await;
        match &state.current {
            Some(current) if !current.cancel.is_cancelled() => {
                info!("⏭️ Saltando '{}' en guild {}", current.track.title, self.guild_id);
                current.cancel.cancel();
                CommandOutcome::Skipped
            }
            _ => CommandOutcome::NothingToSkip,
        }
    }

    pub async fn toggle_pause(&self) -> CommandOutcome {
        let (link, track, message, paused) = {
            let state = self.state.lock().await;
            let Some(link) = state.link.clone().filter(|_| !state.closed) else {
                return CommandOutcome::NotConnected;
            };
            let Some(current) = &state.current else {
                return CommandOutcome::NothingPlaying;
            };

            let paused = !*self.pause.borrow();
            self.pause.send_replace(paused);
            if paused {
                self.clock.pause();
            } else {
                self.clock.resume();
            }
            (link, current.track.clone(), state.message, paused)
        };

        link.set_speaking(!paused).await;
        info!(
            "{} '{}' en guild {}",
            if paused { "⏸️ Pausado" } else { "▶️ Reanudado" },
            track.title,
            self.guild_id
        );

        // Refleja el botón Pause/Resume sin esperar al siguiente tick
        if let Some(message) = message {
            let status = render_progress(
                &track,
                self.clock.elapsed(),
                &self.queue.snapshot(),
                self.services.settings.queue_preview_len,
                paused,
            );
            if let Err(e) = self.services.board.edit(message, status).await {
                warn!("⚠️ No se pudo actualizar 'Now playing': {}", e);
            }
        }

        if paused {
            CommandOutcome::Paused
        } else {
            CommandOutcome::Resumed
        }
    }

    /// Tears the session down: clears the queue, stops the current track,
    /// disconnects and leaves the registry. Returns `false` when another call
    /// (or the inactivity timer) already did it.
    pub async fn shutdown(&self, reason: &str) -> bool {
        let teardown = {
            let mut state = self.state.lock().await;
            match self.begin_teardown(&mut state) {
                Some(teardown) => teardown,
                None => return false,
            }
        };
        self.finish_teardown(teardown, reason).await;
        true
    }

    fn begin_teardown(&self, state: &mut SessionState) -> Option<Teardown> {
        if state.closed {
            return None;
        }
        state.closed = true;
        *self.connected.lock() = None;

        let discarded = self.queue.clear();
        if let Some(current) = &state.current {
            current.cancel.cancel();
        }
        if let Some(timer) = state.idle_timer.take() {
            timer.cancel();
        }

        Some(Teardown {
            link: state.link.take(),
            player: state.player.take(),
            message: state.message.take(),
            discarded,
        })
    }

    async fn finish_teardown(&self, teardown: Teardown, reason: &str) {
        // El player mata y recolecta el decodificador antes de terminar
        if let Some(player) = teardown.player {
            if let Err(e) = player.await {
                error!("❌ El player de guild {} terminó con error: {}", self.guild_id, e);
            }
        }

        if let Some(link) = teardown.link {
            link.disconnect().await;
        }

        if let Some(message) = teardown.message {
            if let Err(e) = self.services.board.edit(message, render_stopped()).await {
                warn!("⚠️ No se pudo actualizar el mensaje final: {}", e);
            }
        }

        self.detach();
        self.released.cancel();
        info!(
            "👋 Sesión de guild {} cerrada ({}), {} pistas descartadas",
            self.guild_id, reason, teardown.discarded
        );
    }

    /// A session that never got a link nor a player is simply dropped.
    fn abandon_if_unused(&self, state: &mut SessionState) {
        if state.link.is_none() && state.player.is_none() && self.queue.is_empty() {
            state.closed = true;
            self.detach();
            self.released.cancel();
        }
    }

    fn detach(&self) {
        if let Some(sessions) = self.registry.upgrade() {
            sessions.remove_if(&self.guild_id, |_, session| std::ptr::eq(session.as_ref(), self));
        }
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut SessionState) {
        let token = CancellationToken::new();
        if let Some(previous) = state.idle_timer.replace(token.clone()) {
            previous.cancel();
        }

        let timeout = self.services.settings.inactivity_timeout;
        debug!("⏱️ Timer de inactividad armado ({:?}) en guild {}", timeout, self.guild_id);

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }

            let teardown = {
                let mut state = session.state.lock().await;
                if token.is_cancelled() {
                    return;
                }
                session.begin_teardown(&mut state)
            };

            if let Some(teardown) = teardown {
                info!("💤 Sin actividad en guild {}, desconectando", session.guild_id);
                session.finish_teardown(teardown, "inactividad").await;
            }
        });
    }

    fn spawn_player(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_player().await })
    }

    async fn run_player(self: Arc<Self>) {
        let mut encoder = self.encoder.lock().await;
        let mut last_played: Option<Track> = None;

        loop {
            let (track, cancel, link) = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return;
                }
                let Some(link) = state.link.clone() else {
                    return;
                };

                let Some(track) = self.queue.dequeue() else {
                    state.current = None;
                    state.player = None;
                    let message = state.message.take();
                    self.arm_idle_timer(&mut state);
                    drop(state);

                    if let (Some(message), Some(track)) = (message, last_played) {
                        if let Err(e) = self.services.board.edit(message, render_finished(&track)).await {
                            warn!("⚠️ No se pudo actualizar el mensaje final: {}", e);
                        }
                    }
                    info!("📭 Cola terminada en guild {}", self.guild_id);
                    return;
                };

                if let Some(timer) = state.idle_timer.take() {
                    timer.cancel();
                }
                let cancel = CancellationToken::new();
                state.current = Some(NowPlaying {
                    track: track.clone(),
                    cancel: cancel.clone(),
                });
                self.pause.send_replace(false);
                self.clock.restart();
                (track, cancel, link)
            };

            info!("🎵 Reproduciendo '{}' en guild {}", track.title, self.guild_id);
            let outcome = self.play_track(&track, &link, &cancel, &mut encoder).await;
            cancel.cancel();

            match &outcome {
                PlaybackOutcome::Finished => info!("✅ Terminó '{}'", track.title),
                PlaybackOutcome::Skipped => info!("⏭️ '{}' interrumpida", track.title),
                PlaybackOutcome::Failed(e) => error!("❌ '{}' falló: {}", track.title, e),
            }

            self.state.lock().await.current = None;
            last_played = Some(track);
        }
    }

    /// One streaming attempt. Every task and process it starts is stopped
    /// before it returns.
    async fn play_track(
        &self,
        track: &Track,
        link: &Arc<dyn VoiceLink>,
        cancel: &CancellationToken,
        encoder: &mut FrameEncoder,
    ) -> PlaybackOutcome {
        let services = &self.services;
        let settings = &services.settings;

        let message = match services
            .board
            .post(track.text_channel, render_start(track, !self.queue.is_empty()))
            .await
        {
            Ok(message) => {
                let mut state = self.state.lock().await;
                if state.closed {
                    drop(state);
                    if let Err(e) = services.board.edit(message, render_stopped()).await {
                        warn!("⚠️ No se pudo actualizar el mensaje final: {}", e);
                    }
                    return PlaybackOutcome::Skipped;
                }
                state.message = Some(message);
                Some(message)
            }
            Err(e) => {
                warn!("⚠️ No se pudo publicar 'Now playing': {}", e);
                None
            }
        };

        let stream_url = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PlaybackOutcome::Skipped,
            url = services.resolver.stream_url(&track.url) => url,
        };
        let stream_url = match stream_url {
            Ok(url) => url,
            Err(e) => {
                self.notice(track.text_channel, STREAM_ERROR_NOTICE).await;
                return PlaybackOutcome::Failed(e);
            }
        };
        if cancel.is_cancelled() {
            return PlaybackOutcome::Skipped;
        }

        let mut pipeline = match services.transcoder.start(&stream_url, self.guild_id) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.notice(track.text_channel, STREAM_ERROR_NOTICE).await;
                return PlaybackOutcome::Failed(e);
            }
        };

        let drain = pipeline
            .take_diagnostics()
            .map(|stderr| drain_diagnostics(stderr, self.guild_id, cancel.child_token()));

        {
            // Tiempo transcurrido desde que suena, no desde que se resolvió
            let _state = self.state.lock().await;
            self.clock.restart();
            if *self.pause.borrow() {
                self.clock.pause();
            }
        }

        let reporter = message.map(|message| {
            Reporter {
                board: services.board.clone(),
                message,
                track: track.clone(),
                queue: self.queue.clone(),
                clock: self.clock.clone(),
                interval: settings.now_playing_interval,
                preview_len: settings.queue_preview_len,
            }
            .spawn(cancel.child_token())
        });

        // Una pausa pedida durante la extracción sigue vigente
        let paused = *self.pause.borrow();
        link.set_speaking(!paused).await;
        let mut pause = self.pause.subscribe();
        let outcome = drive(
            pipeline.pcm(),
            encoder,
            link.as_ref(),
            &mut pause,
            cancel,
            settings.max_pause,
        )
        .await;

        cancel.cancel();
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        pipeline.stop().await;
        if let Some(drain) = drain {
            let _ = drain.await;
        }
        link.set_speaking(false).await;

        outcome
    }

    async fn notice(&self, channel_id: ChannelId, text: &str) {
        if let Err(e) = self.services.board.notice(channel_id, text).await {
            warn!("⚠️ No se pudo enviar aviso: {}", e);
        }
    }
}
