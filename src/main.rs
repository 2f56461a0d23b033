use anyhow::{Context as _, Result};
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{fs::OpenOptions, path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;
mod voice;

#[cfg(test)]
mod testing;

use crate::{
    audio::{
        pipeline::FfmpegTranscoder,
        session::{PlaybackServices, SessionSettings},
        SessionRegistry,
    },
    bot::JukeboxBot,
    config::Config,
    sources::SourceRouter,
    ui::status::DiscordStatusBoard,
    voice::SongbirdGateway,
};

/// Logging a stdout y, con `LOG_FILE`, también al archivo (sin colores)
fn init_tracing(log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("jukebox_bot=debug,serenity=info,songbird=info")
    });

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("No se pudo abrir el log {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(std::env::var_os("LOG_FILE").map(PathBuf::from))?;

    info!("🎵 Iniciando Jukebox Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());
    if let Some(path) = &config.log_file {
        info!("📝 Log duplicado en {}", path.display());
    }

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let resolver = Arc::new(SourceRouter::new(&config));
    let registry = Arc::new(SessionRegistry::new(PlaybackServices {
        gateway: Arc::new(SongbirdGateway::new(songbird.clone())),
        resolver: resolver.clone(),
        transcoder: Arc::new(FfmpegTranscoder::new(&config)),
        board: Arc::new(DiscordStatusBoard::new(Arc::new(Http::new(&config.discord_token)))),
        settings: Arc::new(SessionSettings::from_config(&config)),
    }));

    let handler = JukeboxBot::new(config.clone(), registry.clone(), resolver);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Cierre ordenado: cada sesión mata su decodificador y sale del canal
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    bot::maintenance::verify_tools(config).await?;
    println!("OK");
    Ok(())
}
