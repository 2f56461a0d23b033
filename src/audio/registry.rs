use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    audio::{
        queue::Track,
        session::{CommandOutcome, GuildSession, PlaybackServices},
    },
    error::{MusicError, MusicResult},
};

pub type SessionMap = DashMap<GuildId, Arc<GuildSession>>;

/// Sesiones activas por guild. Se crean en el primer `enqueue` y se quitan
/// solas al cerrarse.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    services: PlaybackServices,
}

impl SessionRegistry {
    pub fn new(services: PlaybackServices) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            services,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    fn get_or_create(&self, guild_id: GuildId) -> MusicResult<Arc<GuildSession>> {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let session = Arc::new(GuildSession::new(
                    guild_id,
                    self.services.clone(),
                    Arc::downgrade(&self.sessions),
                )?);
                debug!("🆕 Sesión creada para guild {}", guild_id);
                entry.insert(session.clone());
                Ok(session)
            }
        }
    }

    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        tracks: Vec<Track>,
    ) -> MusicResult<CommandOutcome> {
        if tracks.is_empty() {
            return Err(MusicError::NotFound(String::new()));
        }

        let session = self.get_or_create(guild_id)?;
        match session.enqueue(voice_channel, tracks.clone()).await {
            Err(MusicError::SessionClosed) => {
                // La sesión anterior se está cerrando: se espera a que suelte
                // el canal y se abre una nueva
                debug!("♻️ Sesión de guild {} cerrándose, esperando para reabrir", guild_id);
                session.released().await;
                self.sessions.remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &session));
                self.get_or_create(guild_id)?.enqueue(voice_channel, tracks).await
            }
            outcome => outcome,
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> CommandOutcome {
        match self.get(guild_id) {
            Some(session) => session.skip().await,
            None => CommandOutcome::NothingToSkip,
        }
    }

    pub async fn toggle_pause(&self, guild_id: GuildId) -> CommandOutcome {
        match self.get(guild_id) {
            Some(session) => session.toggle_pause().await,
            None => CommandOutcome::NotConnected,
        }
    }

    pub async fn stop(&self, guild_id: GuildId) -> CommandOutcome {
        match self.get(guild_id) {
            Some(session) => {
                session.shutdown("stop").await;
                CommandOutcome::Stopped
            }
            None => CommandOutcome::NotConnected,
        }
    }

    /// The bot left `channel_id` without a stop command (a moderator
    /// disconnected it). Only a session connected to that channel is closed,
    /// so the echo of our own leave never hits a session that is still joining.
    pub async fn voice_disconnected(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let Some(session) = self.get(guild_id) else {
            return false;
        };
        if session.connected_channel() != Some(channel_id) {
            debug!("🔇 Salida del canal {} ignorada en guild {}", channel_id, guild_id);
            return false;
        }
        session.shutdown("desconectado del canal").await
    }

    /// Pista actual y cola pendiente, para `/queue`
    pub async fn queue_snapshot(&self, guild_id: GuildId) -> (Option<Track>, Vec<Track>) {
        match self.get(guild_id) {
            Some(session) => (session.now_playing().await, session.upcoming()),
            None => (None, Vec::new()),
        }
    }

    /// Cierra todas las sesiones (apagado del bot)
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<GuildSession>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        if sessions.is_empty() {
            return;
        }

        info!("🛑 Cerrando {} sesiones activas", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.shutdown("apagado"))).await;
    }
}
