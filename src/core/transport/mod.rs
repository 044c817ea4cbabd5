//! Transport layer for the peripheral link
//!
//! Supports:
//! - Serial ports (USB CDC / UART adapters)
//! - Dry run (frames are logged, nothing is written)
//! - Scripted in-memory device for tests and simulation

mod dry_run;
mod mock;
mod serial;

pub use dry_run::DryRunTransport;
pub use mock::{MockDevice, MockDeviceHandle};
pub use serial::{list_ports, SerialConfig, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Transport type enumeration
#[derive(Debug, Clone)]
pub enum Transport {
    /// Serial port connection
    Serial(SerialConfig),
    /// Log-only transport
    DryRun,
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// Dry run
    DryRun,
    /// In-memory device
    Mock,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::DryRun => write!(f, "Dry run"),
            Self::Mock => write!(f, "Mock"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Short write
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the device
        written: usize,
        /// Bytes in the frame
        expected: usize,
    },
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Read calls that returned data
    pub reads: u64,
    /// Errors count
    pub errors: u64,
    /// Times the link was opened
    pub opens: u64,
}

/// Byte-stream transport to the peripheral board
///
/// One owner drives both directions, so implementations do not need to
/// guard against interleaved writes themselves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send {
    /// Acquire the device
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Release the device
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Write one complete frame
    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max` bytes, blocking at most for the read timeout
    async fn receive(&mut self, max: usize) -> Result<Bytes, TransportError>;

    /// Bytes buffered and readable without blocking
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}

/// Create a transport instance from configuration
pub fn create_transport(config: Transport) -> Box<dyn TransportTrait> {
    match config {
        Transport::Serial(cfg) => Box::new(SerialTransport::new(cfg)),
        Transport::DryRun => Box::new(DryRunTransport::new()),
    }
}
