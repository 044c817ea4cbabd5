//! # PCCLink Core Library
//!
//! Bridges a pub/sub command bus and the VRC peripheral control board
//! over a framed serial link.
//!
//! ## Features
//!
//! - CRC-8/DVB-S2 framed binary protocol, encoder and streaming decoder
//! - Topic router with per-topic validation
//! - Thermal readings published back onto the bus
//! - Non-blocking device reset with scheduled reopen
//! - Dry-run transport and a scripted in-memory device
//! - CLI with exit codes and a JSON-lines bus adapter
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pcclink_core::{Bridge, BridgeConfig, BusMessage, LocalBus, SerialConfig, Transport};
//! use pcclink_core::core::transport::create_transport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = create_transport(Transport::Serial(SerialConfig::new("/dev/ttyACM0", 115200)));
//!     let mut bridge = Bridge::new(transport, BridgeConfig::default());
//!
//!     let bus = LocalBus::default();
//!     let mut readings = bus.subscribe();
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     let shutdown = CancellationToken::new();
//!
//!     tokio::spawn(async move {
//!         while let Ok(msg) = readings.recv().await {
//!             println!("{}: {}", msg.topic, String::from_utf8_lossy(&msg.payload));
//!         }
//!     });
//!
//!     tx.send(BusMessage::new("vrc/pcc/set_laser_on", "{}")).await?;
//!     bridge.run(rx, Arc::new(bus), shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, PipeMode};
pub use crate::config::{AppConfig, ConfigError, LoggingConfig};
pub use crate::core::bridge::{Bridge, BridgeConfig, BridgeError, BridgeState, BridgeStats};
pub use crate::core::bus::{BusError, BusMessage, BusPublisher, LocalBus};
pub use crate::core::command::{Command, CommandError};
pub use crate::core::logger::{init_tracing, LogFormat, TrafficLogger};
pub use crate::core::protocol::{
    encode, FrameDecoder, FrameError, Opcode, Reading, ThermalReading,
};
pub use crate::core::router::{CommandRouter, RouteError};
pub use crate::core::transport::{
    SerialConfig, Transport, TransportError, TransportTrait, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
