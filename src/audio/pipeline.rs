//! One external decoder process per track.
//!
//! The decoder (ffmpeg in production) reads the resolved stream URL and
//! writes raw s16le stereo PCM at 48 kHz on stdout; its stderr is exposed as
//! a line stream for logging. Killing is idempotent and also covers the case
//! where the process already exited on its own.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{io, process::Stdio};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::encoder::{CHANNELS, SAMPLE_RATE},
    config::Config,
    error::{MusicError, MusicResult},
};

pub type PcmStream = Box<dyn AsyncRead + Send + Unpin>;
pub type DiagnosticStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Starts decoder pipelines. Spawning is synchronous; the caller owns the
/// returned pipeline and must `stop` it.
pub trait Transcoder: Send + Sync {
    fn start(&self, stream_url: &str, guild_id: GuildId) -> MusicResult<TranscodePipeline>;
}

/// Handle on whatever produces the PCM for one track.
#[async_trait]
pub trait DecoderProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Mata el proceso y espera a que sea recolectado. Idempotente.
    async fn kill(&mut self);
}

pub struct TranscodePipeline {
    pcm: PcmStream,
    diagnostics: Option<DiagnosticStream>,
    process: Box<dyn DecoderProcess>,
}

impl TranscodePipeline {
    pub fn new(
        pcm: PcmStream,
        diagnostics: Option<DiagnosticStream>,
        process: Box<dyn DecoderProcess>,
    ) -> Self {
        Self {
            pcm,
            diagnostics,
            process,
        }
    }

    pub fn pcm(&mut self) -> &mut PcmStream {
        &mut self.pcm
    }

    pub fn take_diagnostics(&mut self) -> Option<DiagnosticStream> {
        self.diagnostics.take()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Forcibly terminates the decoder. Safe to call repeatedly or after the
    /// process already exited.
    pub async fn stop(&mut self) {
        self.process.kill().await;
    }
}

/// Proceso hijo real (ffmpeg o cualquier otro comando)
pub struct ChildProcess {
    child: Option<Child>,
    pid: Option<u32>,
}

#[async_trait]
impl DecoderProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => debug!("🪦 Decodificador {:?} ya terminó: {}", self.pid, status),
            _ => {
                if let Err(e) = child.kill().await {
                    debug!("Error matando decodificador {:?}: {}", self.pid, e);
                } else {
                    debug!("🔪 Decodificador {:?} terminado", self.pid);
                }
            }
        }
    }
}

/// Spawns `program args..` with stdout/stderr piped and wraps it as a
/// pipeline.
pub fn spawn_decoder(program: &str, args: &[String]) -> MusicResult<TranscodePipeline> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(MusicError::PipelineStart)?;

    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        // kill_on_drop se encarga del proceso
        return Err(MusicError::PipelineStart(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "no se pudieron conectar stdout/stderr del decodificador",
        )));
    };

    Ok(TranscodePipeline::new(
        Box::new(stdout),
        Some(Box::new(BufReader::new(stderr))),
        Box::new(ChildProcess {
            child: Some(child),
            pid,
        }),
    ))
}

/// ffmpeg invocation built from the configuration: reconnect options and the
/// filter chain are passed straight through.
pub struct FfmpegTranscoder {
    program: String,
    reconnect_delay: u32,
    audio_filter: Option<String>,
}

impl FfmpegTranscoder {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            reconnect_delay: config.ffmpeg_reconnect_delay,
            audio_filter: config.audio_filter(),
        }
    }

    pub fn args(&self, stream_url: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            self.reconnect_delay.to_string(),
            "-nostdin".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-i".into(),
            stream_url.into(),
            "-vn".into(),
        ];

        if let Some(filter) = &self.audio_filter {
            args.push("-af".into());
            args.push(filter.clone());
        }

        args.extend([
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            SAMPLE_RATE.to_string(),
            "-ac".into(),
            CHANNELS.to_string(),
            "pipe:1".into(),
        ]);
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn start(&self, stream_url: &str, guild_id: GuildId) -> MusicResult<TranscodePipeline> {
        let pipeline = spawn_decoder(&self.program, &self.args(stream_url))?;
        info!(
            "🎛️ ffmpeg iniciado (pid {:?}) para guild {}",
            pipeline.process_id(),
            guild_id
        );
        Ok(pipeline)
    }
}

/// Logs decoder stderr line by line until EOF or until the track's token is
/// cancelled.
pub fn drain_diagnostics(
    stream: DiagnosticStream,
    guild_id: GuildId,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = stream.lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => debug!("[ffmpeg {}] {}", guild_id, line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error leyendo stderr del decodificador en guild {}: {}", guild_id, e);
                        break;
                    }
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::PCM_FRAME_BYTES;
    use pretty_assertions::assert_eq;
    use std::{path::Path, time::Duration};
    use tokio::io::AsyncReadExt;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn is_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[tokio::test]
    async fn reads_all_pcm_until_eof() {
        let mut pipeline =
            spawn_decoder("sh", &sh(&format!("head -c {} /dev/zero", PCM_FRAME_BYTES * 3))).unwrap();

        let mut pcm = Vec::new();
        pipeline.pcm().read_to_end(&mut pcm).await.unwrap();
        assert_eq!(pcm.len(), PCM_FRAME_BYTES * 3);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn stop_kills_a_running_decoder_and_is_idempotent() {
        let mut pipeline = spawn_decoder("sh", &sh("exec cat /dev/zero")).unwrap();
        let pid = pipeline.process_id().unwrap();

        let mut frame = [0u8; PCM_FRAME_BYTES];
        pipeline.pcm().read_exact(&mut frame).await.unwrap();
        assert!(is_alive(pid));

        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!is_alive(pid), "el proceso debería estar recolectado");
    }

    #[tokio::test]
    async fn stop_after_natural_exit_is_a_no_op() {
        let mut pipeline = spawn_decoder("sh", &sh("exit 0")).unwrap();
        let mut rest = Vec::new();
        pipeline.pcm().read_to_end(&mut rest).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        pipeline.stop().await;
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn missing_binary_is_a_pipeline_start_error() {
        let result = spawn_decoder("/nonexistent/decoder-binary", &[]);
        assert!(matches!(result, Err(MusicError::PipelineStart(_))));
    }

    #[tokio::test]
    async fn stderr_is_exposed_as_lines() {
        let mut pipeline = spawn_decoder("sh", &sh("echo 'first' >&2; echo 'second' >&2")).unwrap();
        let mut lines = pipeline.take_diagnostics().unwrap().lines();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second"));
        assert!(pipeline.take_diagnostics().is_none());
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn drain_stops_on_cancellation() {
        let mut pipeline = spawn_decoder("sh", &sh("exec sleep 30")).unwrap();
        let token = CancellationToken::new();
        let drain = drain_diagnostics(
            pipeline.take_diagnostics().unwrap(),
            GuildId::new(1),
            token.clone(),
        );

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), drain).await.unwrap().unwrap();
        pipeline.stop().await;
    }

    #[test]
    fn ffmpeg_arguments_carry_reconnect_and_filters() {
        let config = Config {
            ffmpeg_reconnect_delay: 7,
            ..Config::default()
        };
        let args = FfmpegTranscoder::new(&config).args("https://cdn.example/audio");

        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[position("-reconnect_delay_max") + 1], "7");
        assert_eq!(args[position("-i") + 1], "https://cdn.example/audio");
        assert_eq!(Some(args[position("-af") + 1].clone()), config.audio_filter());
        assert_eq!(
            &args[args.len() - 7..],
            &["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]
        );
    }

    #[test]
    fn ffmpeg_arguments_skip_empty_filter_chain() {
        let config = Config {
            enable_resampling: false,
            audio_compressor: false,
            audio_normalization: false,
            ..Config::default()
        };
        let args = FfmpegTranscoder::new(&config).args("u");
        assert!(!args.iter().any(|a| a == "-af"));
    }
}
