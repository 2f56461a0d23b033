//! Voice transport seam.
//!
//! The playback core only ever sees these two traits: a gateway that joins a
//! guild's voice channel and the link it hands back. Packet framing and the
//! network side stay behind the songbird adapter.

pub mod ogg;
pub mod songbird_link;

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;

use crate::error::MusicResult;

pub use songbird_link::SongbirdGateway;

/// Live handle into one guild's voice channel.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Sends one encoded 20 ms Opus frame. May wait when the transport is
    /// behind.
    async fn send(&self, frame: Bytes) -> MusicResult<()>;

    async fn set_speaking(&self, speaking: bool);

    /// Leaves the channel. Calling it again is a no-op.
    async fn disconnect(&self);
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<Arc<dyn VoiceLink>>;
}
