//! Serial port transport implementation

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            read_timeout_ms: 5000,
        }
    }

    /// Set read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", 115200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    stats: TransportStats,
}

impl SerialTransport {
    /// Create a new serial transport; the port is opened by [`TransportTrait::open`]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            stats: TransportStats::default(),
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        // serialport opens TTYs in exclusive mode on unix
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                serialport::ErrorKind::Io(io_kind) => match io_kind {
                    std::io::ErrorKind::NotFound => {
                        TransportError::PortNotFound(self.config.port.clone())
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        TransportError::PermissionDenied(self.config.port.clone())
                    }
                    _ => TransportError::ConnectionFailed(e.to_string()),
                },
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        tracing::info!("opened {}", self.connection_info());
        self.port = Some(port);
        self.stats.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            tracing::info!("closed {}", self.config.port);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        let result = port.write_all(data).and_then(|()| port.flush());

        match result {
            Ok(()) => {
                self.stats.bytes_sent += data.len() as u64;
                self.stats.frames_sent += 1;
                Ok(data.len())
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    async fn receive(&mut self, max: usize) -> Result<Bytes, TransportError> {
        let port = self.port_mut()?;
        let mut buffer = vec![0u8; max];

        match port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                self.stats.bytes_received += n as u64;
                self.stats.reads += 1;
                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // No data within the timeout
                Ok(Bytes::new())
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| TransportError::IoError(e.into()))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud (timeout {} ms)",
            self.config.port, self.config.baud_rate, self.config.read_timeout_ms
        )
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
