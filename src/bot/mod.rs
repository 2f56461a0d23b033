//! # Bot Module
//!
//! serenity glue: slash-command registration, command and button handling,
//! and voice-state tracking. Playback itself lives in [`crate::audio`]; this
//! layer only resolves queries and turns command outcomes into replies.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod maintenance;

use crate::{audio::SessionRegistry, config::Config, sources::MediaResolver};

/// Event handler de serenity
pub struct JukeboxBot {
    config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub resolver: Arc<dyn MediaResolver>,
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>, resolver: Arc<dyn MediaResolver>) -> Self {
        Self {
            config,
            registry,
            resolver,
            maintenance_started: AtomicBool::new(false),
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // `ready` se repite en cada reconexión del gateway
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = self.config.clone();
        tokio::spawn(async move {
            if let Err(e) = maintenance::verify_tools(&config).await {
                warn!("⚠️ {:#}", e);
            }
            maintenance::maintenance_tasks(config).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Si alguien desconecta al bot del canal, la sesión de esa guild se cierra.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let (Some(guild_id), Some(left)) = (new.guild_id, old.and_then(|old| old.channel_id)) else {
            return;
        };

        if self.registry.voice_disconnected(guild_id, left).await {
            info!("🔌 Bot desconectado del canal {} en guild {}", left, guild_id);
        }
    }
}
