//! Log-only transport for running without hardware

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use async_trait::async_trait;
use bytes::Bytes;

/// Accepts frames and logs them instead of writing; never produces input
#[derive(Debug, Default)]
pub struct DryRunTransport {
    open: bool,
    stats: TransportStats,
}

impl DryRunTransport {
    /// Create a dry-run transport
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransportTrait for DryRunTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        tracing::info!("serial transmission is off (dry run)");
        self.open = true;
        self.stats.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        tracing::info!("dry run frame: {}", hex::encode(data));
        self.stats.bytes_sent += data.len() as u64;
        self.stats.frames_sent += 1;
        Ok(data.len())
    }

    async fn receive(&mut self, _max: usize) -> Result<Bytes, TransportError> {
        Ok(Bytes::new())
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::DryRun
    }

    fn connection_info(&self) -> String {
        "dry run (no serial)".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
