//! # Audio Module
//!
//! Per-guild playback: queue, PCM to Opus, decoder processes and the
//! sessions that tie them to a voice link.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::GuildSession`] per guild, created on first enqueue
//! - Sessions remove themselves when they close
//!
//! ### [`session`] - Guild Session
//! - Owns the voice link, queue, pause flag and inactivity timer
//! - Runs a single player task that pulls tracks one at a time
//!
//! ### [`pipeline`] / [`driver`] / [`encoder`] - Streaming
//! - ffmpeg decodes the source to raw PCM on stdout
//! - The driver reads 20 ms frames, encodes them to Opus and paces the sends
//!
//! ### [`reporter`] - Now Playing
//! - Edits the status message with elapsed time and a queue preview
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed little-endian
//! - **Channels**: Stereo
//! - **Frame**: 960 samples per channel (20 ms)

pub mod driver;
pub mod encoder;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod reporter;
pub mod session;

pub use registry::SessionRegistry;
pub use session::CommandOutcome;
