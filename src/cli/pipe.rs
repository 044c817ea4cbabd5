//! CLI Pipe Support
//!
//! Bridges the message bus over stdin/stdout as JSON lines:
//!
//! ```text
//! {"topic": "vrc/pcc/set_laser_on", "payload": {}}
//! ```
//!
//! Any bus client can feed the daemon by piping envelopes into it and
//! consume readings from its output.

use crate::core::bus::{BusError, BusMessage, BusPublisher, Envelope};
use parking_lot::Mutex;
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pipe mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// No piping, interactive mode
    Interactive,
    /// Read from stdin
    StdinOnly,
    /// Write to stdout
    StdoutOnly,
    /// Full pipe mode (stdin -> process -> stdout)
    Full,
}

impl PipeMode {
    /// Detect pipe mode from environment
    pub fn detect() -> Self {
        let stdin_is_tty = atty::is(atty::Stream::Stdin);
        let stdout_is_tty = atty::is(atty::Stream::Stdout);

        match (stdin_is_tty, stdout_is_tty) {
            (true, true) => Self::Interactive,
            (false, true) => Self::StdinOnly,
            (true, false) => Self::StdoutOnly,
            (false, false) => Self::Full,
        }
    }

    /// Is interactive?
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive)
    }
}

/// Parse one envelope line; blank lines yield `None`
pub fn parse_envelope(line: &str) -> Result<Option<BusMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let envelope: Envelope = serde_json::from_str(line)?;
    Ok(Some(envelope.into()))
}

/// Forward envelopes from `reader` until EOF or the receiver goes away
///
/// Lines that are not valid envelopes are logged and skipped. Returns the
/// number of messages forwarded.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<BusMessage>) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        match parse_envelope(&line) {
            Ok(Some(msg)) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("skipping bad envelope: {}", e),
        }
    }

    tracing::debug!("bus input ended after {} messages", forwarded);
    Ok(forwarded)
}

/// Spawn a task feeding stdin envelopes into `tx`
pub fn spawn_stdin_reader(tx: mpsc::Sender<BusMessage>) -> JoinHandle<io::Result<u64>> {
    tokio::spawn(forward_lines(BufReader::new(tokio::io::stdin()), tx))
}

/// Publisher writing envelopes as JSON lines
pub struct StdoutPublisher {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for StdoutPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutPublisher {
    /// Publish to the process stdout
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Publish to any writer
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl BusPublisher for StdoutPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload: serde_json::from_slice(payload)?,
        };
        let line = serde_json::to_string(&envelope)?;

        let mut out = self.out.lock();
        writeln!(out, "{}", line)
            .and_then(|()| out.flush())
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }
}
