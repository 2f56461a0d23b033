use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        pause_command(),
        stop_command(),
        queue_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song from YouTube, Spotify or a direct link")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL or search terms",
            )
            .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause or resume playback")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and leave the voice channel")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the upcoming songs")
}
