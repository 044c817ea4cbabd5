//! Peripheral board wire protocol
//!
//! Provides:
//! - CRC-8/DVB-S2 checksum
//! - Opcode table
//! - Frame encoder (host to device)
//! - Streaming frame decoder (device to host)
//! - Structured readings decoded from inbound frames

pub mod checksum;
pub mod decoder;
pub mod frame;
pub mod opcode;
pub mod reading;

pub use checksum::crc8_dvb_s2;
pub use decoder::{DecodeState, DecodedFrame, DecoderConfig, DecoderStats, FrameDecoder};
pub use frame::{encode, encode_frame, Direction, Frame, FrameEncoder};
pub use opcode::Opcode;
pub use reading::{Reading, ThermalReading, ThermalReadingMessage};

use thiserror::Error;

/// Protocol error types
#[derive(Error, Debug)]
pub enum FrameError {
    /// Opcode outside the fixed table
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Payload does not fit the 16-bit length field
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// I/O error from a codec stream
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
