//! Ogg Opus framing for already-encoded packets.
//!
//! songbird only accepts audio through an `Input`. Wrapping our 20 ms Opus
//! frames in an Ogg stream (one packet per page) lets its demuxer hand them
//! to the mixer untouched, without decoding and re-encoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::{
    io::{self, Read, Seek, SeekFrom},
    time::Duration,
};
use symphonia::core::io::MediaSource;

use crate::audio::encoder::{CHANNELS, FRAME_DURATION_MS, FRAME_SAMPLES, SAMPLE_RATE};

/// Opus DTX silence, used when the sender falls behind the mixer.
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const FLAG_BEGIN_OF_STREAM: u8 = 0x02;
const FLAG_END_OF_STREAM: u8 = 0x04;
const VENDOR: &str = concat!("jukebox-bot ", env!("CARGO_PKG_VERSION"));

/// Tabla CRC-32 de Ogg (polinomio 0x04C11DB7, sin reflejar, init 0)
const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |crc, byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// `OpusHead` identification header (RFC 7845 §5.1), channel mapping 0.
pub fn opus_head() -> Bytes {
    let mut head = BytesMut::with_capacity(19);
    head.put_slice(b"OpusHead");
    head.put_u8(1);
    head.put_u8(CHANNELS as u8);
    head.put_u16_le(0); // pre-skip
    head.put_u32_le(SAMPLE_RATE);
    head.put_i16_le(0); // output gain
    head.put_u8(0);
    head.freeze()
}

pub fn opus_tags() -> Bytes {
    let mut tags = BytesMut::with_capacity(16 + VENDOR.len());
    tags.put_slice(b"OpusTags");
    tags.put_u32_le(VENDOR.len() as u32);
    tags.put_slice(VENDOR.as_bytes());
    tags.put_u32_le(0);
    tags.freeze()
}

/// Writes one logical Ogg stream, one packet per page.
#[derive(Debug)]
pub struct OggPageWriter {
    serial: u32,
    sequence: u32,
    granule: u64,
}

impl OggPageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            granule: 0,
        }
    }

    /// Both Opus header pages. Must come before any audio page.
    pub fn headers(&mut self) -> BytesMut {
        let mut out = BytesMut::new();
        self.write_page(&mut out, &opus_head(), FLAG_BEGIN_OF_STREAM, 0);
        self.write_page(&mut out, &opus_tags(), 0, 0);
        out
    }

    /// Appends a page holding one 20 ms Opus packet.
    pub fn audio(&mut self, out: &mut BytesMut, packet: &[u8]) {
        self.granule += FRAME_SAMPLES as u64;
        self.write_page(out, packet, 0, self.granule);
    }

    /// Empty end-of-stream page.
    pub fn finish(&mut self, out: &mut BytesMut) {
        self.write_page(out, &[], FLAG_END_OF_STREAM, self.granule);
    }

    fn write_page(&mut self, out: &mut BytesMut, packet: &[u8], flags: u8, granule: u64) {
        // Lacing: 255s y el resto; un múltiplo exacto de 255 termina en 0
        let mut lacing = vec![255u8; packet.len() / 255];
        lacing.push((packet.len() % 255) as u8);

        let start = out.len();
        out.put_slice(CAPTURE_PATTERN);
        out.put_u8(0);
        out.put_u8(flags);
        out.put_u64_le(granule);
        out.put_u32_le(self.serial);
        out.put_u32_le(self.sequence);
        out.put_u32_le(0);
        out.put_u8(lacing.len() as u8);
        out.put_slice(&lacing);
        out.put_slice(packet);

        let crc = crc32(&out[start..]);
        out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
        self.sequence += 1;
    }
}

/// Ogg Opus byte stream fed by a channel of encoded frames.
///
/// Reads block until a frame arrives. If none shows up within one frame
/// period a silent frame is emitted instead, so the mixer never stalls.
/// The stream ends once every sender is dropped.
pub struct OggOpusSource {
    frames: flume::Receiver<Bytes>,
    writer: OggPageWriter,
    pending: BytesMut,
    ended: bool,
}

impl OggOpusSource {
    pub fn new(frames: flume::Receiver<Bytes>, serial: u32) -> Self {
        let mut writer = OggPageWriter::new(serial);
        let pending = writer.headers();
        Self {
            frames,
            writer,
            pending,
            ended: false,
        }
    }

    fn refill(&mut self) {
        match self
            .frames
            .recv_timeout(Duration::from_millis(FRAME_DURATION_MS))
        {
            Ok(frame) => self.writer.audio(&mut self.pending, &frame),
            Err(flume::RecvTimeoutError::Timeout) => {
                self.writer.audio(&mut self.pending, &SILENT_FRAME)
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                self.writer.finish(&mut self.pending);
                self.ended = true;
            }
        }
    }
}

impl Read for OggOpusSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            if self.ended {
                return Ok(0);
            }
            self.refill();
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

impl Seek for OggOpusSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "el stream Ogg en vivo no admite seek",
        ))
    }
}

impl MediaSource for OggOpusSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Separa un buffer en páginas, devolviendo (flags, granule, seq, payload)
    fn split_pages(mut data: &[u8]) -> Vec<(u8, u64, u32, Vec<u8>)> {
        let mut pages = Vec::new();
        while !data.is_empty() {
            assert_eq!(&data[..4], CAPTURE_PATTERN);
            let flags = data[5];
            let granule = u64::from_le_bytes(data[6..14].try_into().unwrap());
            let sequence = u32::from_le_bytes(data[18..22].try_into().unwrap());
            let stored_crc = u32::from_le_bytes(data[22..26].try_into().unwrap());
            let segments = data[26] as usize;
            let body_len: usize = data[27..27 + segments].iter().map(|&l| l as usize).sum();
            let page_len = 27 + segments + body_len;

            let mut zeroed = data[..page_len].to_vec();
            zeroed[22..26].fill(0);
            assert_eq!(crc32(&zeroed), stored_crc, "page {sequence} crc");

            pages.push((flags, granule, sequence, data[27 + segments..page_len].to_vec()));
            data = &data[page_len..];
        }
        pages
    }

    #[test]
    fn crc_matches_the_ogg_reference_value() {
        // CRC-32/POSIX sin el xor final: "123456789" -> 0x89A1897F
        assert_eq!(crc32(b"123456789"), 0x89A1_897F);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn headers_then_audio_pages_with_advancing_granule() {
        let mut writer = OggPageWriter::new(7);
        let mut out = writer.headers();
        writer.audio(&mut out, &[1, 2, 3]);
        writer.audio(&mut out, &[4, 5]);
        writer.finish(&mut out);

        let pages = split_pages(&out);
        assert_eq!(pages.len(), 5);

        assert_eq!(pages[0].0, FLAG_BEGIN_OF_STREAM);
        assert_eq!(&pages[0].3[..8], b"OpusHead");
        assert_eq!(pages[0].3[9], 2);
        assert_eq!(u32::from_le_bytes(pages[0].3[12..16].try_into().unwrap()), 48_000);
        assert_eq!(&pages[1].3[..8], b"OpusTags");

        assert_eq!((pages[2].1, pages[2].3.clone()), (960, vec![1, 2, 3]));
        assert_eq!((pages[3].1, pages[3].3.clone()), (1920, vec![4, 5]));
        assert_eq!(pages[4].0, FLAG_END_OF_STREAM);

        let sequences: Vec<u32> = pages.iter().map(|p| p.2).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn packets_of_exactly_255_bytes_get_a_terminating_lace() {
        let mut writer = OggPageWriter::new(1);
        let mut out = BytesMut::new();
        writer.audio(&mut out, &[9u8; 255]);

        assert_eq!(out[26], 2);
        assert_eq!(&out[27..29], &[255, 0]);
        assert_eq!(split_pages(&out)[0].3.len(), 255);
    }

    #[test]
    fn source_streams_frames_and_ends_when_senders_drop() {
        let (tx, rx) = flume::bounded(4);
        tx.send(Bytes::from_static(&[0xaa; 10])).unwrap();
        drop(tx);

        let mut source = OggOpusSource::new(rx, 3);
        let mut data = Vec::new();
        // Lecturas pequeñas para cruzar límites de página
        let mut buf = [0u8; 7];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }

        let pages = split_pages(&data);
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[2].3, vec![0xaa; 10]);
        assert_eq!(pages[3].0, FLAG_END_OF_STREAM);
        assert!(!source.is_seekable());
    }

    #[test]
    fn slow_sender_yields_silence() {
        let (_tx, rx) = flume::bounded::<Bytes>(4);
        let mut source = OggOpusSource::new(rx, 3);

        let mut buf = vec![0u8; 4096];
        let mut data = Vec::new();
        while split_pages_count(&data) < 3 {
            let n = source.read(&mut buf).unwrap();
            data.extend_from_slice(&buf[..n]);
        }
        assert_eq!(split_pages(&data)[2].3, SILENT_FRAME.to_vec());
    }

    fn split_pages_count(data: &[u8]) -> usize {
        if data.is_empty() {
            0
        } else {
            split_pages(data).len()
        }
    }
}
