//! Diagnostic logging and frame traffic capture
//!
//! Diagnostics go through `tracing`. The traffic log is a separate file with
//! one line per frame crossing the serial link.

use crate::config::LoggingConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// File name stem for rolling diagnostic logs
pub const LOG_FILE_PREFIX: &str = "pcclink.log";

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr, and additionally to a daily rolling file when a directory is
/// configured. The returned guard must be held until exit so buffered file
/// output is flushed.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr = fmt::layer().with_writer(io::stderr);
    layers.push(if config.json {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    });

    let guard = config.directory.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file = fmt::layer().with_ansi(false).with_writer(writer);
        layers.push(if config.json {
            file.json().boxed()
        } else {
            file.boxed()
        });
        guard
    });

    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::registry().with(layers).with(filter).try_init();
    guard
}

/// Traffic log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `[timestamp] TX 24 50 3C ...`
    #[default]
    Text,
    /// One JSON object per line
    #[serde(alias = "jsonlines")]
    Jsonl,
}

impl LogFormat {
    /// Get file extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Text => "log",
            LogFormat::Jsonl => "jsonl",
        }
    }

    /// Get all formats
    pub fn all() -> &'static [LogFormat] {
        &[LogFormat::Text, LogFormat::Jsonl]
    }
}

/// Frame direction on the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    Received,
    /// Host to device
    Sent,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Received => "RX",
            Direction::Sent => "TX",
        }
    }
}

/// A single traffic log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local wall-clock time
    pub timestamp: DateTime<Local>,
    /// Link direction
    pub direction: Direction,
    /// Complete frame as lowercase hex
    pub frame: String,
    /// Opcode name or other annotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LogEntry {
    /// Create new entry
    pub fn new(direction: Direction, frame: &[u8], note: Option<&str>) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            frame: hex::encode(frame),
            note: note.map(str::to_string),
        }
    }

    /// Format as text
    pub fn to_text(&self) -> String {
        let mut spaced = String::with_capacity(self.frame.len() * 3 / 2);
        for (i, pair) in self.frame.as_bytes().chunks(2).enumerate() {
            if i > 0 {
                spaced.push(' ');
            }
            spaced.extend(pair.iter().map(|b| b.to_ascii_uppercase() as char));
        }
        let mut line = format!(
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.direction.tag(),
            spaced
        );
        if let Some(note) = &self.note {
            line.push_str("  ; ");
            line.push_str(note);
        }
        line
    }

    /// Format as JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Append-only frame traffic log
pub struct TrafficLogger {
    file: BufWriter<File>,
    format: LogFormat,
    path: PathBuf,
    lines: usize,
}

impl TrafficLogger {
    /// Open (or append to) a traffic log
    ///
    /// When `path` is a directory a timestamped file is created inside it.
    pub fn open(path: impl AsRef<Path>, format: LogFormat) -> io::Result<Self> {
        let mut path = path.as_ref().to_path_buf();
        if path.is_dir() {
            path.push(generate_log_filename("traffic", format));
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            format,
            path,
            lines: 0,
        })
    }

    /// Log path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Log one frame
    pub fn log(&mut self, direction: Direction, frame: &[u8], note: Option<&str>) {
        let entry = LogEntry::new(direction, frame, note);
        let line = match self.format {
            LogFormat::Text => entry.to_text(),
            LogFormat::Jsonl => entry.to_json(),
        };

        if let Err(e) = writeln!(self.file, "{}", line) {
            tracing::warn!("traffic log write to {} failed: {}", self.path.display(), e);
            return;
        }
        self.lines += 1;

        // Flush periodically
        if self.lines % 32 == 0 {
            self.flush();
        }
    }

    /// Log a frame written to the device
    pub fn log_tx(&mut self, frame: &[u8], note: Option<&str>) {
        self.log(Direction::Sent, frame, note);
    }

    /// Log a frame read from the device
    pub fn log_rx(&mut self, frame: &[u8], note: Option<&str>) {
        self.log(Direction::Received, frame, note);
    }

    /// Flush to disk
    pub fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

impl Drop for TrafficLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Generate a traffic log filename with timestamp
pub fn generate_log_filename(prefix: &str, format: LogFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}
