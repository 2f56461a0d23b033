use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;

use super::buttons::components_for;
use crate::error::{MusicError, MusicResult};

/// Dónde vive un mensaje de estado ya publicado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Player buttons attached to a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub paused: bool,
    /// Skip is only offered while something is waiting in the queue.
    pub can_skip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub content: String,
    pub controls: Option<Controls>,
}

impl StatusMessage {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            controls: None,
        }
    }

    pub fn with_controls(content: impl Into<String>, controls: Controls) -> Self {
        Self {
            content: content.into(),
            controls: Some(controls),
        }
    }
}

/// Where the session publishes what it is doing. Failures here are logged by
/// the caller and never stop playback.
#[async_trait]
pub trait StatusBoard: Send + Sync {
    async fn post(&self, channel_id: ChannelId, message: StatusMessage) -> MusicResult<MessageRef>;

    async fn edit(&self, target: MessageRef, message: StatusMessage) -> MusicResult<()>;

    /// One-off text without controls (errors, warnings).
    async fn notice(&self, channel_id: ChannelId, text: &str) -> MusicResult<()>;
}

/// Implementación sobre la API HTTP de Discord
pub struct DiscordStatusBoard {
    http: Arc<Http>,
}

impl DiscordStatusBoard {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StatusBoard for DiscordStatusBoard {
    async fn post(&self, channel_id: ChannelId, message: StatusMessage) -> MusicResult<MessageRef> {
        let builder = CreateMessage::new()
            .content(message.content)
            .components(components_for(message.controls));

        let sent = channel_id
            .send_message(&*self.http, builder)
            .await
            .map_err(|e| MusicError::Board(e.to_string()))?;

        Ok(MessageRef {
            channel_id,
            message_id: sent.id,
        })
    }

    async fn edit(&self, target: MessageRef, message: StatusMessage) -> MusicResult<()> {
        let builder = EditMessage::new()
            .content(message.content)
            .components(components_for(message.controls));

        target
            .channel_id
            .edit_message(&*self.http, target.message_id, builder)
            .await
            .map_err(|e| MusicError::Board(e.to_string()))?;
        Ok(())
    }

    async fn notice(&self, channel_id: ChannelId, text: &str) -> MusicResult<()> {
        channel_id
            .say(&*self.http, text)
            .await
            .map_err(|e| MusicError::Board(e.to_string()))?;
        Ok(())
    }
}
