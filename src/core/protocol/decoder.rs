//! Inbound frame decoder
//!
//! A byte-at-a-time state machine that scans the serial stream for
//! device-to-host frames. Malformed input never surfaces as an error:
//! the partial frame is dropped, the event is logged, and scanning
//! resumes from the next preamble mark.

use super::checksum::crc8_dvb_s2;
use super::frame::{Frame, DIR_TO_HOST, HEADER_LEN, PREAMBLE_MARK, PREAMBLE_TAG};
use super::{FrameError, Opcode};
use crate::core::transport::{TransportError, TransportTrait};
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::Decoder;

/// Largest chunk pulled from the transport per poll
const READ_CHUNK: usize = 4096;

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Scanning for the first preamble byte
    SeekMark,
    /// Expecting the second preamble byte, then the direction byte
    SeekDir {
        /// Second preamble byte already matched
        tag_seen: bool,
    },
    /// Reading the big-endian length field
    ReadLen {
        /// High byte, once received
        hi: Option<u8>,
    },
    /// Reading opcode and payload
    ReadBody {
        /// Bytes still expected
        remaining: usize,
    },
    /// Reading the trailing checksum byte
    ReadChecksum,
}

/// Decoder tuning
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Reject frames whose checksum does not match
    pub verify_checksum: bool,
    /// Largest accepted length field
    pub max_frame_len: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            max_frame_len: 2048,
        }
    }
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Complete frames delivered
    pub frames: u64,
    /// Bytes thrown away while resynchronizing
    pub discarded_bytes: u64,
    /// Frames dropped on checksum mismatch
    pub bad_checksum: u64,
    /// Frames dropped on an unknown opcode
    pub bad_opcode: u64,
    /// Frames dropped on a zero or oversized length
    pub bad_length: u64,
}

/// A frame together with the exact bytes it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Parsed frame
    pub frame: Frame,
    /// Wire bytes including the received checksum
    pub raw: Vec<u8>,
}

/// Streaming decoder for device-to-host frames
///
/// When a candidate frame turns out to be malformed only its leading `$`
/// is discarded; the bytes after it are scanned again, so a real frame
/// hiding behind a false preamble is still found.
#[derive(Debug)]
pub struct FrameDecoder {
    config: DecoderConfig,
    state: DecodeState,
    current: Vec<u8>,
    replay: VecDeque<u8>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl FrameDecoder {
    /// Create a decoder
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            state: DecodeState::SeekMark,
            current: Vec::with_capacity(HEADER_LEN + 72),
            replay: VecDeque::new(),
            stats: DecoderStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Counters since creation
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop any partial frame and pending input
    pub fn clear(&mut self) {
        self.stats.discarded_bytes += (self.current.len() + self.replay.len()) as u64;
        self.current.clear();
        self.replay.clear();
        self.state = DecodeState::SeekMark;
    }

    /// Add data and return every frame it completes
    pub fn push(&mut self, data: &[u8]) -> Vec<DecodedFrame> {
        let mut buf = BytesMut::from(data);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.decode(&mut buf) {
            frames.push(frame);
        }
        frames
    }

    /// Non-blocking poll: read whatever the transport has buffered and decode it
    pub async fn poll(
        &mut self,
        transport: &mut dyn TransportTrait,
    ) -> Result<Vec<DecodedFrame>, TransportError> {
        let available = transport.bytes_available()?;
        if available == 0 {
            return Ok(Vec::new());
        }
        let chunk = transport.receive(available.min(READ_CHUNK)).await?;
        Ok(self.push(&chunk))
    }

    fn step(&mut self, byte: u8) -> Option<DecodedFrame> {
        match self.state {
            DecodeState::SeekMark => {
                if byte == PREAMBLE_MARK {
                    self.current.push(byte);
                    self.state = DecodeState::SeekDir { tag_seen: false };
                } else {
                    self.stats.discarded_bytes += 1;
                }
            }
            DecodeState::SeekDir { tag_seen: false } => {
                self.current.push(byte);
                if byte == PREAMBLE_TAG {
                    self.state = DecodeState::SeekDir { tag_seen: true };
                } else {
                    tracing::trace!("preamble mismatch: {:#04x}", byte);
                    self.abort();
                }
            }
            DecodeState::SeekDir { tag_seen: true } => {
                self.current.push(byte);
                if byte == DIR_TO_HOST {
                    self.state = DecodeState::ReadLen { hi: None };
                } else {
                    tracing::debug!("unexpected direction byte {:#04x}", byte);
                    self.abort();
                }
            }
            DecodeState::ReadLen { hi: None } => {
                self.current.push(byte);
                self.state = DecodeState::ReadLen { hi: Some(byte) };
            }
            DecodeState::ReadLen { hi: Some(hi) } => {
                self.current.push(byte);
                let len = u16::from_be_bytes([hi, byte]) as usize;
                if len == 0 || len > self.config.max_frame_len {
                    tracing::warn!("discarding frame with length {}", len);
                    self.stats.bad_length += 1;
                    self.abort();
                } else {
                    self.state = DecodeState::ReadBody { remaining: len };
                }
            }
            DecodeState::ReadBody { remaining } => {
                let at_opcode = self.current.len() == HEADER_LEN;
                self.current.push(byte);
                if at_opcode && Opcode::try_from(byte).is_err() {
                    tracing::warn!("discarding frame with unknown opcode {}", byte);
                    self.stats.bad_opcode += 1;
                    self.abort();
                } else if remaining > 1 {
                    self.state = DecodeState::ReadBody {
                        remaining: remaining - 1,
                    };
                } else {
                    self.state = DecodeState::ReadChecksum;
                }
            }
            DecodeState::ReadChecksum => return self.finish(byte),
        }
        None
    }

    /// Drop the false preamble mark and rescan everything after it
    fn abort(&mut self) {
        self.stats.discarded_bytes += 1;
        for &byte in self.current[1..].iter().rev() {
            self.replay.push_front(byte);
        }
        self.current.clear();
        self.state = DecodeState::SeekMark;
    }

    fn finish(&mut self, checksum: u8) -> Option<DecodedFrame> {
        if self.config.verify_checksum {
            let expected = crc8_dvb_s2(&self.current);
            if expected != checksum {
                tracing::warn!(
                    "discarding frame: checksum {:#04x}, expected {:#04x}",
                    checksum,
                    expected
                );
                self.stats.bad_checksum += 1;
                self.current.push(checksum);
                self.abort();
                return None;
            }
        }

        let mut raw = std::mem::take(&mut self.current);
        self.state = DecodeState::SeekMark;
        let opcode = match Opcode::try_from(raw[HEADER_LEN]) {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!("discarding frame: {}", e);
                self.stats.bad_opcode += 1;
                self.stats.discarded_bytes += raw.len() as u64 + 1;
                return None;
            }
        };
        let payload = raw[HEADER_LEN + 1..].to_vec();
        raw.push(checksum);

        self.stats.frames += 1;
        tracing::trace!("decoded {} ({} payload bytes)", opcode, payload.len());
        Some(DecodedFrame {
            frame: Frame::inbound(opcode, payload),
            raw,
        })
    }
}

impl Decoder for FrameDecoder {
    type Item = DecodedFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>, FrameError> {
        loop {
            let byte = match self.replay.pop_front() {
                Some(byte) => byte,
                None if src.has_remaining() => src.get_u8(),
                None => return Ok(None),
            };
            if let Some(frame) = self.step(byte) {
                return Ok(Some(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::{encode, encode_frame, Direction};
    use rand::{Rng, SeedableRng};

    fn thermal_frame(value: u8) -> Vec<u8> {
        encode_frame(Direction::ToHost, Opcode::SendThermalReading, &[value; 64]).unwrap()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::default();
        let bytes = thermal_frame(128);
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame.opcode, Opcode::SendThermalReading);
        assert_eq!(frames[0].frame.payload, vec![128; 64]);
        assert_eq!(frames[0].raw, bytes);
        assert_eq!(decoder.state(), DecodeState::SeekMark);
    }

    #[test]
    fn test_round_trip_all_opcodes() {
        let mut decoder = FrameDecoder::default();
        for (i, op) in Opcode::all().iter().enumerate() {
            let payload: Vec<u8> = (0..i as u8 * 3).collect();
            let bytes = encode_frame(Direction::ToHost, *op, &payload).unwrap();
            let frames = decoder.push(&bytes);
            assert_eq!(
                frames,
                vec![DecodedFrame {
                    frame: Frame::inbound(*op, payload),
                    raw: bytes,
                }]
            );
        }
    }

    #[test]
    fn test_split_across_pushes() {
        let mut decoder = FrameDecoder::default();
        let bytes = thermal_frame(7);
        let mut frames = Vec::new();
        for chunk in bytes.chunks(5) {
            frames.extend(decoder.push(chunk));
        }
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_noise_then_frame() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        for _ in 0..50 {
            let noise: Vec<u8> = (0..rng.gen_range(0..200)).map(|_| rng.gen::<u8>()).collect();
            let mut decoder = FrameDecoder::default();
            let mut stream = noise.clone();
            stream.extend(thermal_frame(128));
            let frames = decoder.push(&stream);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].frame.payload, vec![128; 64]);
            assert_eq!(decoder.stats().discarded_bytes, noise.len() as u64);
        }
    }

    #[test]
    fn test_partial_preamble_noise_then_frame() {
        let tails: [&[u8]; 6] = [
            &[0x24],
            &[0x24, 0x50],
            &[0x24, 0x50, 0x3E],
            &[0x24, 0x50, 0x3E, 0x00],
            &[0x24, 0x50, 0x3E, 0x00, 0x05],
            &[0x07, 0x24, 0x50, 0x3E, 0x00, 0x41, 0x0F],
        ];
        for tail in tails {
            let mut decoder = FrameDecoder::default();
            let mut stream = tail.to_vec();
            stream.extend(thermal_frame(128));
            let frames = decoder.push(&stream);
            assert_eq!(frames.len(), 1, "after {:02x?}", tail);
            assert_eq!(frames[0].frame.payload, vec![128; 64]);
            assert_eq!(decoder.stats().discarded_bytes, tail.len() as u64);
            assert_eq!(decoder.state(), DecodeState::SeekMark);
        }
    }

    #[test]
    fn test_frame_inside_failed_candidate() {
        // A false header whose body swallows a complete frame
        let inner = thermal_frame(5);
        let mut stream = vec![0x24, 0x50, 0x3E, 0x00, inner.len() as u8 + 1, 0x0F];
        stream.extend_from_slice(&inner);
        stream.push(0x00);
        let mut decoder = FrameDecoder::default();
        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw, inner);
        assert_eq!(decoder.stats().bad_checksum, 1);
    }

    #[test]
    fn test_false_mark_then_frame() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0x24, 0x11, 0x24, 0x50, 0x3C, 0x24];
        stream.extend(thermal_frame(3));
        let frames = decoder.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame.payload, vec![3; 64]);
    }

    #[test]
    fn test_outbound_direction_rejected() {
        let mut decoder = FrameDecoder::default();
        let bytes = encode(Opcode::SetLaserOn, &[]).unwrap();
        assert!(decoder.push(&bytes).is_empty());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut decoder = FrameDecoder::default();
        let mut bytes = thermal_frame(9);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(decoder.push(&bytes).is_empty());
        assert_eq!(decoder.stats().bad_checksum, 1);

        // Decoder recovers for the next good frame
        assert_eq!(decoder.push(&thermal_frame(9)).len(), 1);
    }

    #[test]
    fn test_bad_checksum_accepted_when_permissive() {
        let mut decoder = FrameDecoder::new(DecoderConfig {
            verify_checksum: false,
            ..DecoderConfig::default()
        });
        let mut bytes = thermal_frame(9);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw, bytes);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut decoder = FrameDecoder::default();
        let stream = [0x24, 0x50, 0x3E, 0x00, 0x01, 0x20, 0x00];
        assert!(decoder.push(&stream).is_empty());
        assert_eq!(decoder.stats().bad_opcode, 1);
        assert_eq!(decoder.state(), DecodeState::SeekMark);
    }

    #[test]
    fn test_zero_and_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(DecoderConfig {
            verify_checksum: true,
            max_frame_len: 100,
        });
        assert!(decoder.push(&[0x24, 0x50, 0x3E, 0x00, 0x00]).is_empty());
        assert!(decoder.push(&[0x24, 0x50, 0x3E, 0x00, 0x65]).is_empty());
        assert_eq!(decoder.stats().bad_length, 2);
        assert_eq!(decoder.push(&thermal_frame(1)).len(), 1);
    }

    #[test]
    fn test_codec_decode_leaves_remaining_bytes() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&thermal_frame(1));
        buf.extend_from_slice(&thermal_frame(2));
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.frame.payload[0], 1);
        assert_eq!(buf.len(), thermal_frame(2).len());
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.frame.payload[0], 2);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
