//! Wire frame layout and the outbound encoder
//!
//! ```text
//! [$][P][dir][LEN-HI][LEN-LO][OPCODE][PAYLOAD...][CRC]
//! ```
//!
//! `LEN` counts the opcode plus payload. The CRC covers every byte before it.

use super::checksum::crc8_dvb_s2;
use super::{FrameError, Opcode};
use bytes::BytesMut;
use tokio_util::codec::Encoder;

/// First preamble byte ('$')
pub const PREAMBLE_MARK: u8 = 0x24;
/// Second preamble byte ('P')
pub const PREAMBLE_TAG: u8 = 0x50;
/// Direction byte for host to device ('<')
pub const DIR_TO_DEVICE: u8 = 0x3C;
/// Direction byte for device to host ('>')
pub const DIR_TO_HOST: u8 = 0x3E;

/// Bytes before the opcode: preamble, direction, length
pub const HEADER_LEN: usize = 5;
/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - 1;

/// Frame direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to peripheral board
    ToDevice,
    /// Peripheral board to host
    ToHost,
}

impl Direction {
    /// Wire byte
    pub fn byte(self) -> u8 {
        match self {
            Direction::ToDevice => DIR_TO_DEVICE,
            Direction::ToHost => DIR_TO_HOST,
        }
    }
}

/// A decoded or to-be-encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Direction byte
    pub direction: Direction,
    /// Operation code
    pub opcode: Opcode,
    /// Payload after the opcode
    pub payload: Vec<u8>,
}

impl Frame {
    /// Host to device frame
    pub fn outbound(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            direction: Direction::ToDevice,
            opcode,
            payload,
        }
    }

    /// Device to host frame
    pub fn inbound(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            direction: Direction::ToHost,
            opcode,
            payload,
        }
    }

    /// Value of the length field for this frame
    pub fn length_field(&self) -> usize {
        1 + self.payload.len()
    }

    /// Serialize to wire bytes, computing a fresh checksum
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.direction, self.opcode, &self.payload)
    }
}

/// Build a host to device frame
pub fn encode(opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_frame(Direction::ToDevice, opcode, payload)
}

/// Build a frame in either direction
pub fn encode_frame(
    direction: Direction,
    opcode: Opcode,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let length = (1 + payload.len()) as u16;

    let mut out = Vec::with_capacity(HEADER_LEN + 2 + payload.len());
    out.extend_from_slice(&[PREAMBLE_MARK, PREAMBLE_TAG, direction.byte()]);
    out.extend_from_slice(&length.to_be_bytes());
    out.push(opcode.code());
    out.extend_from_slice(payload);
    out.push(crc8_dvb_s2(&out));
    Ok(out)
}

/// Stream encoder for use with `tokio_util::codec::FramedWrite`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder;

impl Encoder<Frame> for FrameEncoder {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(&frame.to_bytes()?);
        Ok(())
    }
}
