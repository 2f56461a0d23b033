use audiopus::{coder::Encoder as OpusEncoder, Bitrate, Channels, SampleRate};
use bytes::Bytes;

use crate::{config::OpusSettings, error::MusicResult};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// 960 muestras por canal = 20 ms a 48 kHz
pub const FRAME_SAMPLES: usize = 960;
pub const FRAME_DURATION_MS: u64 = 20;
/// Bytes de un frame PCM s16le estéreo
pub const PCM_FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

const MAX_PACKET_BYTES: usize = PCM_FRAME_BYTES;

/// PCM i16 → Opus. One instance per guild session; the libopus state is
/// carried from frame to frame, so frames must be fed in stream order.
pub struct FrameEncoder {
    encoder: OpusEncoder,
    samples: Vec<i16>,
    packet: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(settings: &OpusSettings) -> MusicResult<Self> {
        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, settings.application.into())?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(settings.bitrate))?;
        encoder.set_complexity(settings.complexity)?;
        encoder.set_inband_fec(settings.inband_fec)?;
        encoder.set_packet_loss_perc(settings.packet_loss_perc)?;
        encoder.set_dtx(settings.dtx)?;

        Ok(Self {
            encoder,
            samples: vec![0; FRAME_SAMPLES * CHANNELS],
            packet: vec![0; MAX_PACKET_BYTES],
        })
    }

    /// Encodes one 20 ms frame of interleaved little-endian PCM.
    pub fn encode(&mut self, pcm: &[u8; PCM_FRAME_BYTES]) -> MusicResult<Bytes> {
        for (sample, bytes) in self.samples.iter_mut().zip(pcm.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let written = self.encoder.encode(&self.samples, &mut self.packet)?;
        Ok(Bytes::copy_from_slice(&self.packet[..written]))
    }
}
