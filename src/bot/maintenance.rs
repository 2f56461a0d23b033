use anyhow::{bail, Context as _, Result};
use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{config::Config, sources::ytdlp::YtDlp};

const UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Verifica que yt-dlp y ffmpeg se puedan ejecutar
pub async fn verify_tools(config: &Config) -> Result<()> {
    let mut missing = Vec::new();

    match YtDlp::new(config).version().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => {
            warn!("❌ yt-dlp no disponible en '{}': {}", config.ytdlp_path, e);
            missing.push(config.ytdlp_path.as_str());
        }
    }

    match first_output_line(&config.ffmpeg_path, &["-version"]).await {
        Ok(line) => info!("✅ {}", line),
        Err(e) => {
            warn!("❌ ffmpeg no disponible en '{}': {:#}", config.ffmpeg_path, e);
            missing.push(config.ffmpeg_path.as_str());
        }
    }

    if !missing.is_empty() {
        bail!("Herramientas no disponibles: {}", missing.join(", "));
    }
    Ok(())
}

async fn first_output_line(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("no se pudo ejecutar {program}"))?;

    if !output.status.success() {
        bail!("{program} terminó con {}", output.status);
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Separa `YTDLP_UPDATE_COMMAND` en programa y argumentos
fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

async fn update_ytdlp(command: &str) -> Result<String> {
    let Some((program, args)) = split_command(command) else {
        bail!("YTDLP_UPDATE_COMMAND está vacío");
    };

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("no se pudo ejecutar {program}"))?;

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if !output.status.success() {
        bail!("{} ({}):\n{}", program, output.status, combined.trim());
    }
    Ok(combined.trim().to_string())
}

/// Actualiza yt-dlp una vez al día, si está activado
pub async fn maintenance_tasks(config: Arc<Config>) {
    if !config.ytdlp_auto_update {
        return;
    }

    let start = tokio::time::Instant::now() + UPDATE_INTERVAL;
    let mut interval = tokio::time::interval_at(start, UPDATE_INTERVAL);

    loop {
        interval.tick().await;

        info!("🔄 Buscando actualizaciones de yt-dlp...");
        match update_ytdlp(&config.ytdlp_update_command).await {
            Ok(output) => info!("✅ Actualización de yt-dlp completada:\n{}", output),
            Err(e) => warn!("⚠️ Error actualizando yt-dlp: {:#}", e),
        }
    }
}
