//! Scripted in-memory peripheral
//!
//! Records every frame written to it and serves queued bytes back to the
//! reader. Reply rules keyed on the outbound opcode let a test stand in for
//! the board (e.g. answer REQUEST_THERMAL_READING with a thermal frame).

use super::{TransportError, TransportStats, TransportTrait, TransportType};
use crate::core::protocol::frame::HEADER_LEN;
use crate::core::protocol::Opcode;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    fail_open: bool,
    fail_writes: bool,
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    replies: HashMap<Opcode, Vec<u8>>,
    stats: TransportStats,
}

/// In-memory device implementing [`TransportTrait`]
#[derive(Debug, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle onto a [`MockDevice`]
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Create a device and the handle that controls it
    pub fn new() -> (Self, MockDeviceHandle) {
        let device = Self::default();
        let handle = MockDeviceHandle {
            state: device.state.clone(),
        };
        (device, handle)
    }
}

impl MockDeviceHandle {
    /// Queue bytes for the host to read
    pub fn inject(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data.iter().copied());
    }

    /// Reply with `bytes` whenever a frame with `opcode` is written
    pub fn reply_to(&self, opcode: Opcode, bytes: Vec<u8>) {
        self.state.lock().replies.insert(opcode, bytes);
    }

    /// Frames written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Opcodes of frames written so far
    pub fn written_opcodes(&self) -> Vec<u8> {
        self.state
            .lock()
            .written
            .iter()
            .filter_map(|f| f.get(HEADER_LEN).copied())
            .collect()
    }

    /// Make subsequent opens fail
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Whether the host currently holds the device open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Successful opens so far
    pub fn open_count(&self) -> u64 {
        self.state.lock().stats.opens
    }
}

#[async_trait]
impl TransportTrait for MockDevice {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(TransportError::PortNotFound("mock".to_string()));
        }
        state.open = true;
        state.stats.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if state.fail_writes {
            state.stats.errors += 1;
            return Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        state.written.push(data.to_vec());
        state.stats.bytes_sent += data.len() as u64;
        state.stats.frames_sent += 1;

        let reply = data
            .get(HEADER_LEN)
            .and_then(|&code| Opcode::try_from(code).ok())
            .and_then(|op| state.replies.get(&op).cloned());
        if let Some(reply) = reply {
            state.inbound.extend(reply);
        }
        Ok(data.len())
    }

    async fn receive(&mut self, max: usize) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        let n = max.min(state.inbound.len());
        let chunk: Vec<u8> = state.inbound.drain(..n).collect();
        state.stats.bytes_received += n as u64;
        state.stats.reads += 1;
        Ok(Bytes::from(chunk))
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        Ok(state.inbound.len())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Mock
    }

    fn connection_info(&self) -> String {
        "mock device".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}
