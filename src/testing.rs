//! In-memory collaborators for the playback tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    io::{self, Cursor},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{
        encoder::{FRAME_DURATION_MS, PCM_FRAME_BYTES},
        pipeline::{DecoderProcess, TranscodePipeline, Transcoder},
        queue::Track,
    },
    error::{MusicError, MusicResult},
    sources::{MediaResolver, ResolvedTrack},
    ui::status::{MessageRef, StatusBoard, StatusMessage},
    voice::{VoiceGateway, VoiceLink},
};

pub const TEXT_CHANNEL: ChannelId = ChannelId::new(10);
pub const VOICE_CHANNEL: ChannelId = ChannelId::new(11);

/// Track de tres minutos en `https://example.com/<name>`
pub fn track(name: &str) -> Track {
    Track::new(
        ResolvedTrack {
            url: format!("https://example.com/{name}"),
            title: name.to_string(),
            duration: Some(Duration::from_secs(180)),
        },
        TEXT_CHANNEL,
        UserId::new(20),
    )
}

/// Voice link that paces frames like the real transport (one per 20 ms).
#[derive(Default)]
pub struct RecordingLink {
    frames: AtomicUsize,
    speaking: Mutex<Vec<bool>>,
    disconnects: AtomicUsize,
    reject: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_sent(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn speaking_changes(&self) -> Vec<bool> {
        self.speaking.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reject_frames(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_frames(&self, count: usize) {
        while self.frames_sent() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl VoiceLink for RecordingLink {
    async fn send(&self, _frame: Bytes) -> MusicResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(MusicError::VoiceSend("link cerrado".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(FRAME_DURATION_MS)).await;
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_speaking(&self, speaking: bool) {
        self.speaking.lock().push(speaking);
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a fresh `RecordingLink` per join.
#[derive(Default)]
pub struct FakeGateway {
    links: Mutex<Vec<Arc<RecordingLink>>>,
    fail: AtomicBool,
    join_delay: Duration,
    overlapping: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let gateway = Self::default();
        gateway.fail.store(true, Ordering::SeqCst);
        gateway
    }

    /// Every join takes `delay` before answering.
    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay = delay;
        self
    }

    /// Joins made while an earlier link was still connected
    pub fn joins_while_connected(&self) -> usize {
        self.overlapping.load(Ordering::SeqCst)
    }

    pub fn joins(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> Arc<RecordingLink> {
        self.links.lock()[index].clone()
    }

    pub fn total_disconnects(&self) -> usize {
        self.links.lock().iter().map(|l| l.disconnects()).sum()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(&self, guild_id: GuildId, _channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceLink>> {
        if !self.join_delay.is_zero() {
            tokio::time::sleep(self.join_delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MusicError::Join(format!("sin permisos en guild {guild_id}")));
        }
        let link = Arc::new(RecordingLink::new());
        let mut links = self.links.lock();
        if links.iter().any(|l| l.disconnects() == 0) {
            self.overlapping.fetch_add(1, Ordering::SeqCst);
        }
        links.push(link.clone());
        Ok(link)
    }
}

/// Resolver for playback runs. Stream URLs are the locator under
/// `stream://`; `stalled` locators never get one and `slow` ones take a
/// second. `waiting` counts extractions in flight.
#[derive(Default)]
pub struct ScriptedResolver {
    waiting: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResolver for ScriptedResolver {
    async fn resolve(&self, query: &str) -> MusicResult<Vec<ResolvedTrack>> {
        Err(MusicError::NotFound(query.to_string()))
    }

    async fn stream_url(&self, locator: &str) -> MusicResult<String> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.waiting);

        if locator.contains("stalled") {
            std::future::pending::<()>().await;
        } else if locator.contains("slow") {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(locator.replace("https://example.com/", "stream://"))
    }
}

#[derive(Default)]
pub struct RecordingBoard {
    posts: Mutex<Vec<(ChannelId, StatusMessage)>>,
    edits: Mutex<Vec<(MessageRef, StatusMessage)>>,
    notices: Mutex<Vec<(ChannelId, String)>>,
    next_id: AtomicU64,
    post_delay: Duration,
    fail_edits: AtomicBool,
}

impl RecordingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts take `delay`; edits are recorded and then refused.
    pub fn slow_and_failing(delay: Duration) -> Self {
        let board = Self {
            post_delay: delay,
            ..Self::default()
        };
        board.fail_edits.store(true, Ordering::SeqCst);
        board
    }

    pub fn posts(&self) -> Vec<(ChannelId, StatusMessage)> {
        self.posts.lock().clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, StatusMessage)> {
        self.edits.lock().clone()
    }

    pub fn notices(&self) -> Vec<(ChannelId, String)> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl StatusBoard for RecordingBoard {
    async fn post(&self, channel_id: ChannelId, message: StatusMessage) -> MusicResult<MessageRef> {
        if !self.post_delay.is_zero() {
            tokio::time::sleep(self.post_delay).await;
        }
        self.posts.lock().push((channel_id, message));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef {
            channel_id,
            message_id: MessageId::new(id),
        })
    }

    async fn edit(&self, target: MessageRef, message: StatusMessage) -> MusicResult<()> {
        self.edits.lock().push((target, message));
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(MusicError::Board("mensaje borrado".to_string()));
        }
        Ok(())
    }

    async fn notice(&self, channel_id: ChannelId, text: &str) -> MusicResult<()> {
        self.notices.lock().push((channel_id, text.to_string()));
        Ok(())
    }
}

/// Transcoder whose "processes" are counters. Stream URLs decide behaviour:
/// `broken` fails to start, `endless` never ends, anything else yields
/// `frames_per_track` frames.
pub struct ScriptedTranscoder {
    frames_per_track: usize,
    events: Arc<Mutex<Vec<String>>>,
    alive: Arc<AtomicUsize>,
    max_alive: Arc<AtomicUsize>,
}

impl ScriptedTranscoder {
    pub fn new(frames_per_track: usize) -> Self {
        Self {
            frames_per_track,
            events: Arc::default(),
            alive: Arc::default(),
            max_alive: Arc::default(),
        }
    }

    /// `start:<url>` / `kill:<url>` en orden
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }
}

struct ScriptedProcess {
    url: String,
    events: Arc<Mutex<Vec<String>>>,
    alive: Arc<AtomicUsize>,
    done: bool,
}

#[async_trait]
impl DecoderProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn kill(&mut self) {
        if !self.done {
            self.done = true;
            self.alive.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().push(format!("kill:{}", self.url));
        }
    }
}

impl Transcoder for ScriptedTranscoder {
    fn start(&self, stream_url: &str, _guild_id: GuildId) -> MusicResult<TranscodePipeline> {
        if stream_url.contains("broken") {
            return Err(MusicError::PipelineStart(io::Error::new(
                io::ErrorKind::NotFound,
                "decoder missing",
            )));
        }

        let now_alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(now_alive, Ordering::SeqCst);
        self.events.lock().push(format!("start:{stream_url}"));

        let pcm: Box<dyn tokio::io::AsyncRead + Send + Unpin> = if stream_url.contains("endless") {
            Box::new(tokio::io::repeat(0))
        } else {
            Box::new(Cursor::new(vec![0u8; PCM_FRAME_BYTES * self.frames_per_track]))
        };

        Ok(TranscodePipeline::new(
            pcm,
            Some(Box::new(Cursor::new(b"scripted decoder ready\n".to_vec()))),
            Box::new(ScriptedProcess {
                url: stream_url.to_string(),
                events: self.events.clone(),
                alive: self.alive.clone(),
                done: false,
            }),
        ))
    }
}
