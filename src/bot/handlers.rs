use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{queue::Track, CommandOutcome},
    bot::JukeboxBot,
    error::MusicError,
    ui::{buttons::ButtonAction, now_playing::render_queue},
};

const QUEUE_LIST_LEN: usize = 10;

/// Texto de respuesta para el resultado de un comando
pub fn outcome_text(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Started { title, queued } => {
            let mut text = format!("Starting playback: {title}");
            if *queued > 0 {
                text.push_str(&format!("\n{queued} more added to the queue."));
            }
            text
        }
        CommandOutcome::Queued { entries } => {
            let mut text = "Added to queue:\n".to_string();
            for (position, title) in entries {
                text.push_str(&format!("{position}. {title}\n"));
            }
            text
        }
        CommandOutcome::Skipped => "Skipped the current song.".to_string(),
        CommandOutcome::NothingToSkip => "Nothing to skip.".to_string(),
        CommandOutcome::Paused => "Paused".to_string(),
        CommandOutcome::Resumed => "Resumed".to_string(),
        CommandOutcome::NothingPlaying => "Nothing is playing.".to_string(),
        CommandOutcome::NotConnected => "Not currently in a voice channel.".to_string(),
        CommandOutcome::Stopped => "Stopped playing and left the voice channel.".to_string(),
    }
}

/// Texto para el usuario cuando `/play` falla
pub fn error_text(error: &MusicError) -> String {
    match error {
        MusicError::NotFound(_) | MusicError::Resolver(_) => {
            "Error searching for the song on YouTube.".to_string()
        }
        MusicError::Join(_) => "Error joining voice channel.".to_string(),
        MusicError::QueueFull(max) => format!("The queue is full ({max} songs)."),
        MusicError::SessionClosed => "Playback was just stopped, try again.".to_string(),
        _ => "Something went wrong, try again later.".to_string(),
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let registry = &bot.registry;
    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, guild_id, bot).await?,
        "skip" => reply(ctx, &command, outcome_text(&registry.skip(guild_id).await)).await?,
        "pause" => reply(ctx, &command, outcome_text(&registry.toggle_pause(guild_id).await)).await?,
        "stop" => reply(ctx, &command, outcome_text(&registry.stop(guild_id).await)).await?,
        "queue" => {
            let (current, upcoming) = registry.queue_snapshot(guild_id).await;
            reply(ctx, &command, render_queue(current.as_ref(), &upcoming, QUEUE_LIST_LEN)).await?
        }
        _ => reply(ctx, &command, "❌ Comando no reconocido".to_string()).await?,
    }

    Ok(())
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // La resolución puede tardar más de los 3 s de la interacción
    reply(ctx, command, "Searching for the song...".to_string()).await?;

    let content = match play(ctx, command, guild_id, &query, bot).await {
        Ok(text) => text,
        Err(e) => {
            if e.is_user_facing() {
                info!("🙅 /play '{}' en guild {}: {}", query, guild_id, e);
            } else {
                warn!("⚠️ /play '{}' falló en guild {}: {}", query, guild_id, e);
            }
            error_text(&e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

async fn play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    query: &str,
    bot: &JukeboxBot,
) -> Result<String, MusicError> {
    let resolved = bot.resolver.resolve(query).await?;

    let Some(voice_channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return Ok("You are not in a voice channel.".to_string());
    };

    let tracks: Vec<Track> = resolved
        .into_iter()
        .map(|track| Track::new(track, command.channel_id, command.user.id))
        .collect();

    let outcome = bot.registry.enqueue(guild_id, voice_channel, tracks).await?;
    Ok(outcome_text(&outcome))
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id);
    channel_id
}

/// Maneja los botones del mensaje "Now playing"
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    let Some(action) = ButtonAction::from_custom_id(&component.data.custom_id) else {
        warn!("🔘 Botón desconocido: {}", component.data.custom_id);
        return Ok(());
    };

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    // La sesión actualiza el mensaje por su cuenta
    component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await?;

    let outcome = match action {
        ButtonAction::TogglePause => bot.registry.toggle_pause(guild_id).await,
        ButtonAction::Skip => bot.registry.skip(guild_id).await,
        ButtonAction::Stop => bot.registry.stop(guild_id).await,
    };

    if matches!(
        outcome,
        CommandOutcome::NothingToSkip | CommandOutcome::NothingPlaying | CommandOutcome::NotConnected
    ) {
        component
            .create_followup(
                &ctx.http,
                CreateInteractionResponseFollowup::new()
                    .content(outcome_text(&outcome))
                    .ephemeral(true),
            )
            .await?;
    }

    Ok(())
}
