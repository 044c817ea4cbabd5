//! PCCLink - bus to peripheral board bridge daemon
//!
//! Reads bus messages as JSON lines on stdin, drives the board over the
//! serial link, and writes published readings as JSON lines on stdout.

use clap::Parser;
use pcclink_core::cli::{spawn_stdin_reader, CliResult, ExitCodes, PipeMode, StdoutPublisher};
use pcclink_core::core::bus::BusPublisher;
use pcclink_core::core::transport::{create_transport, Transport};
use pcclink_core::{init_tracing, AppConfig, Bridge, TrafficLogger};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bus to peripheral board bridge
#[derive(Parser, Debug)]
#[command(name = "pcclink", version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, env = "PCCLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log frames instead of writing to the serial port
    #[arg(long)]
    dry_run: bool,

    /// Request a thermal reading on this period (milliseconds)
    #[arg(long)]
    thermal_interval_ms: Option<u64>,

    /// Frame traffic log file
    #[arg(long)]
    traffic_log: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if self.dry_run {
            config.bridge.dry_run = true;
        }
        if self.thermal_interval_ms.is_some() {
            config.bridge.thermal_request_interval_ms = self.thermal_interval_ms;
        }
        if self.traffic_log.is_some() {
            config.logging.traffic_log = self.traffic_log.clone();
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return CliResult::from(e).to_exit_code();
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("error: {}", e);
        return CliResult::from(e).to_exit_code();
    }

    let guard = init_tracing(&config.logging);
    tracing::info!("Starting PCCLink v{}", env!("CARGO_PKG_VERSION"));

    let result = run(config).await;
    if let Some(msg) = result.message() {
        if result.is_success() {
            tracing::info!("{}", msg);
        } else {
            tracing::error!("{}", msg);
        }
    }

    // The stdin reader can be parked in a blocking read that would keep the
    // runtime from shutting down; flush logs and exit directly.
    drop(guard);
    std::process::exit(i32::from(result.code()))
}

async fn run(config: AppConfig) -> CliResult {
    let transport = if config.bridge.dry_run {
        create_transport(Transport::DryRun)
    } else {
        create_transport(Transport::Serial(config.serial.clone()))
    };

    let mut bridge = Bridge::new(transport, config.bridge.clone());
    if let Some(path) = &config.logging.traffic_log {
        match TrafficLogger::open(path, config.logging.traffic_format) {
            Ok(logger) => {
                tracing::info!("logging frames to {}", logger.path().display());
                bridge = bridge.with_traffic_log(logger);
            }
            Err(e) => {
                return CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("cannot open traffic log {}: {}", path.display(), e),
                )
            }
        }
    }

    if PipeMode::detect().is_interactive() {
        tracing::info!(
            "reading bus messages from the terminal; subscribed topics: {}",
            bridge.router().topics().join(", ")
        );
    }

    let (tx, rx) = mpsc::channel(256);
    let reader = spawn_stdin_reader(tx);
    let publisher: Arc<dyn BusPublisher> = Arc::new(StdoutPublisher::new());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for interrupts: {}", e),
        }
    });

    let result = bridge.run(rx, publisher, shutdown).await;
    reader.abort();

    match result {
        Ok(stats) => CliResult::success_with_message(format!(
            "{} commands sent, {} dropped, {} readings published, {} resets",
            stats.commands_sent, stats.commands_dropped, stats.readings_published, stats.resets
        )),
        Err(e) => CliResult::from(e),
    }
}
