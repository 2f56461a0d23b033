use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::TrackHandle,
    Call, Songbird,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ogg::OggOpusSource, VoiceGateway, VoiceLink};
use crate::error::{MusicError, MusicResult};

/// Frames en vuelo hacia el mixer (~1 s)
const FRAME_BUFFER: usize = 50;

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceLink>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Join(format!("{e:?}")))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdLink {
            guild_id,
            manager: self.manager.clone(),
            call,
            track: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }))
    }
}

struct LiveTrack {
    frames: flume::Sender<Bytes>,
    handle: TrackHandle,
}

/// A songbird call fed by one live Ogg Opus track.
///
/// The track is created on the first frame and recreated if songbird drops
/// it. Pausing it is how "not speaking" is expressed.
pub struct SongbirdLink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    track: Mutex<Option<LiveTrack>>,
    disconnected: AtomicBool,
}

impl SongbirdLink {
    async fn frame_sender(&self) -> flume::Sender<Bytes> {
        let mut track = self.track.lock().await;
        if let Some(live) = track.as_ref().filter(|live| !live.frames.is_disconnected()) {
            return live.frames.clone();
        }

        let (frames, receiver) = flume::bounded(FRAME_BUFFER);
        let source: Box<dyn MediaSource> = Box::new(OggOpusSource::new(receiver, self.guild_id.get() as u32));
        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: source,
                hint: Some(hint),
            }),
            None,
        );
        let handle = self.call.lock().await.play_input(input);
        debug!("🎚️ Track de voz creado en guild {}", self.guild_id);

        *track = Some(LiveTrack {
            frames: frames.clone(),
            handle,
        });
        frames
    }
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn send(&self, frame: Bytes) -> MusicResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(MusicError::VoiceSend(format!(
                "guild {} desconectado",
                self.guild_id
            )));
        }

        self.frame_sender()
            .await
            .send_async(frame)
            .await
            .map_err(|_| MusicError::VoiceSend(format!("el track de voz de guild {} terminó", self.guild_id)))
    }

    async fn set_speaking(&self, speaking: bool) {
        if let Some(live) = self.track.lock().await.as_ref() {
            let result = if speaking {
                live.handle.play()
            } else {
                live.handle.pause()
            };
            if let Err(e) = result {
                debug!("Track de voz no disponible en guild {}: {:?}", self.guild_id, e);
            }
        }
    }

    async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(live) = self.track.lock().await.take() {
            let _ = live.handle.stop();
        }
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {:?}", self.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}
