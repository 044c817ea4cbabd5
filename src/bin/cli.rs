//! PCCLink CLI - tooling around the peripheral link
//!
//! Encodes bus messages to frames, decodes captured bytes, and talks to a
//! board directly without the bridge daemon.

use clap::{Parser, Subcommand, ValueEnum};
use pcclink_core::cli::{print_exit_codes, transport_code, CliResult, ExitCodes};
use pcclink_core::config::{self, AppConfig, ConfigError, LoggingConfig};
use pcclink_core::core::command::Command;
use pcclink_core::core::protocol::reading::THERMAL_SIDE;
use pcclink_core::core::protocol::{DecoderConfig, Frame, FrameDecoder, FrameError, Reading};
use pcclink_core::core::router::{CommandRouter, RouteError};
use pcclink_core::core::transport::{
    create_transport, list_ports, SerialConfig, Transport, TransportError, TransportTrait,
};
use pcclink_core::init_tracing;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// PCCLink CLI
#[derive(Parser, Debug)]
#[command(
    name = "pcclink-cli",
    version,
    about = "Tools for the VRC peripheral control board link",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Config file (defaults to the per-user config location)
    #[arg(long, env = "PCCLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Serial port selection shared by commands that open the device
#[derive(clap::Args, Debug)]
struct PortArgs {
    /// Serial port name (e.g., /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log frames instead of writing them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// List the bus topics the bridge subscribes to
    Topics,

    /// Print the frame a bus message turns into
    Encode {
        /// Full topic name
        topic: String,
        /// JSON body
        #[arg(default_value = "{}")]
        body: String,
    },

    /// Decode frames from hex bytes captured off the link
    Decode {
        /// Hex bytes (spaces allowed)
        hex: String,
        /// Accept frames with a bad checksum
        #[arg(long)]
        permissive: bool,
    },

    /// Send one bus message to the board
    Send {
        /// Full topic name
        topic: String,
        /// JSON body
        #[arg(default_value = "{}")]
        body: String,
        #[command(flatten)]
        port: PortArgs,
        /// Wait this long for reply frames (milliseconds)
        #[arg(long, default_value = "0")]
        wait_ms: u64,
    },

    /// Print frames and readings arriving from the board
    Monitor {
        #[command(flatten)]
        port: PortArgs,
        /// Request a thermal reading on this period (milliseconds)
        #[arg(long)]
        request_ms: Option<u64>,
        /// Exit after this many readings
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config location
        #[arg(long)]
        init: bool,
    },

    /// List process exit codes
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        ..LoggingConfig::default()
    };
    let _guard = init_tracing(&logging);

    match run(&cli).await {
        Ok(result) => {
            if let Some(msg) = result.message() {
                if !result.is_success() {
                    eprintln!("error: {}", msg);
                } else if !cli.quiet {
                    eprintln!("{}", msg);
                }
            }
            result.to_exit_code()
        }
        Err(e) => {
            let result = classify(&e);
            eprintln!("error: {:#}", e);
            result.to_exit_code()
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => list_serial_ports(cli, *detailed),
        Commands::Topics => show_topics(cli),
        Commands::Encode { topic, body } => encode_message(cli, topic, body),
        Commands::Decode { hex, permissive } => decode_hex(cli, hex, *permissive),
        Commands::Send {
            topic,
            body,
            port,
            wait_ms,
        } => send_message(cli, topic, body, port, *wait_ms).await,
        Commands::Monitor {
            port,
            request_ms,
            count,
        } => monitor(cli, port, *request_ms, *count).await,
        Commands::Config { init } => show_config(cli, *init),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

/// Map an error to the exit code it stands for
fn classify(e: &anyhow::Error) -> CliResult {
    if let Some(err) = e.downcast_ref::<TransportError>() {
        return CliResult::error(transport_code(err), err.to_string());
    }
    if e.downcast_ref::<ConfigError>().is_some() {
        return CliResult::error(ExitCodes::CONFIG_ERROR, e.to_string());
    }
    if e.downcast_ref::<FrameError>().is_some() || e.downcast_ref::<hex::FromHexError>().is_some()
    {
        return CliResult::error(ExitCodes::PROTOCOL_ERROR, e.to_string());
    }
    if e.downcast_ref::<RouteError>().is_some() {
        return CliResult::invalid_args(e.to_string());
    }
    CliResult::error(ExitCodes::ERROR, e.to_string())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    Ok(AppConfig::load(cli.config.as_deref())?)
}

fn command_for(config: &AppConfig, topic: &str, body: &str) -> anyhow::Result<Option<Command>> {
    Ok(config.bridge.router().route(topic, body.as_bytes())?)
}

fn unknown_topic(topic: &str) -> CliResult {
    CliResult::invalid_args(format!(
        "{} is not a routed topic (see `pcclink-cli topics`)",
        topic
    ))
}

fn transport_for(config: &AppConfig, args: &PortArgs) -> Box<dyn TransportTrait> {
    if args.dry_run {
        return create_transport(Transport::DryRun);
    }
    let mut serial: SerialConfig = config.serial.clone();
    if let Some(port) = &args.port {
        serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        serial.baud_rate = baud;
    }
    // Short timeout so the CLI never sits on a blocking read
    create_transport(Transport::Serial(serial.read_timeout(Duration::from_millis(50))))
}

fn list_serial_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(CliResult::success())
}

fn show_topics(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = load_config(cli)?;
    let router: CommandRouter = config.bridge.router();
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&router.topics())?),
        OutputFormat::Text => {
            for topic in router.topics() {
                println!("{}", topic);
            }
        }
    }
    Ok(CliResult::success())
}

fn encode_message(cli: &Cli, topic: &str, body: &str) -> anyhow::Result<CliResult> {
    let config = load_config(cli)?;
    let Some(command) = command_for(&config, topic, body)? else {
        return Ok(unknown_topic(topic));
    };
    let bytes = command.encode()?;

    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "opcode": command.opcode().name(),
                "code": command.opcode().code(),
                "payload": hex::encode(command.payload()),
                "frame": hex::encode(&bytes),
            })
        ),
        OutputFormat::Text => println!("{}", hex::encode(&bytes)),
    }
    Ok(CliResult::success())
}

fn decode_hex(cli: &Cli, input: &str, permissive: bool) -> anyhow::Result<CliResult> {
    let config = load_config(cli)?;
    let bytes = hex::decode(input.replace(char::is_whitespace, ""))?;

    let mut decoder = FrameDecoder::new(DecoderConfig {
        verify_checksum: !permissive,
        ..config.bridge.decoder_config()
    });
    for decoded in decoder.push(&bytes) {
        print_frame(cli, &config, &decoded.frame);
    }

    let stats = decoder.stats();
    Ok(CliResult::success_with_message(format!(
        "{} frames, {} bytes discarded, {} bad checksums",
        stats.frames, stats.discarded_bytes, stats.bad_checksum
    )))
}

async fn send_message(
    cli: &Cli,
    topic: &str,
    body: &str,
    args: &PortArgs,
    wait_ms: u64,
) -> anyhow::Result<CliResult> {
    let config = load_config(cli)?;
    let Some(command) = command_for(&config, topic, body)? else {
        return Ok(unknown_topic(topic));
    };
    let bytes = command.encode()?;

    let mut transport = transport_for(&config, args);
    transport.open().await?;
    let written = transport.send(&bytes).await?;
    if !cli.quiet {
        eprintln!("sent {} ({} bytes) via {}", command, written, transport.connection_info());
    }

    if wait_ms > 0 {
        let mut decoder = FrameDecoder::new(config.bridge.decoder_config());
        let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
        while tokio::time::Instant::now() < deadline {
            for decoded in decoder.poll(transport.as_mut()).await? {
                print_frame(cli, &config, &decoded.frame);
            }
            tokio::time::sleep(config.bridge.poll_interval()).await;
        }
    }

    transport.close().await?;
    Ok(CliResult::success())
}

async fn monitor(
    cli: &Cli,
    args: &PortArgs,
    request_ms: Option<u64>,
    count: Option<u64>,
) -> anyhow::Result<CliResult> {
    let config = load_config(cli)?;
    let mut transport = transport_for(&config, args);
    transport.open().await?;
    if !cli.quiet {
        eprintln!("Monitoring {}. Press Ctrl+C to exit.", transport.connection_info());
    }

    let request = Command::RequestThermalReading.encode()?;
    let mut decoder = FrameDecoder::new(config.bridge.decoder_config());
    let mut poll = tokio::time::interval(config.bridge.poll_interval());
    let mut requests = request_ms
        .filter(|&ms| ms > 0)
        .map(|ms| tokio::time::interval(Duration::from_millis(ms)));
    let mut readings = 0u64;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            _ = poll.tick() => {
                for decoded in decoder.poll(transport.as_mut()).await? {
                    if print_frame(cli, &config, &decoded.frame) {
                        readings += 1;
                    }
                }
                if count.is_some_and(|n| readings >= n) {
                    break;
                }
            }
            _ = async {
                match requests.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Err(e) = transport.send(&request).await {
                    tracing::warn!("thermal request failed: {}", e);
                }
            }
        }
    }

    transport.close().await?;
    Ok(CliResult::success_with_message(format!("{} readings", readings)))
}

fn show_config(cli: &Cli, init: bool) -> anyhow::Result<CliResult> {
    if init {
        let path = cli
            .config
            .clone()
            .or_else(config::config_file)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        AppConfig::default().save(&path)?;
        return Ok(CliResult::success_with_message(format!(
            "wrote {}",
            path.display()
        )));
    }

    let config = load_config(cli)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
    }
    Ok(CliResult::success())
}

/// Print a decoded frame; returns whether it carried a reading
fn print_frame(cli: &Cli, config: &AppConfig, frame: &Frame) -> bool {
    let reading = Reading::from_frame(frame);

    match (cli.format, &reading) {
        (OutputFormat::Json, Some(reading)) => {
            let topic = format!("{}/{}", config.bridge.reading_prefix, reading.topic_suffix());
            let payload: serde_json::Value = reading
                .to_bus_payload()
                .ok()
                .and_then(|body| serde_json::from_slice(&body).ok())
                .unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::json!({ "topic": topic, "payload": payload }));
        }
        (OutputFormat::Json, None) => println!(
            "{}",
            serde_json::json!({
                "opcode": frame.opcode.name(),
                "payload": hex::encode(&frame.payload),
            })
        ),
        (OutputFormat::Text, Some(Reading::Thermal(thermal))) => {
            println!("{}:", frame.opcode.name());
            for row in thermal.samples().chunks(THERMAL_SIDE) {
                let cells: Vec<String> = row.iter().map(|v| format!("{:>3}", v)).collect();
                println!("  {}", cells.join(" "));
            }
        }
        (OutputFormat::Text, None) => {
            println!("{} {}", frame.opcode.name(), hex::encode(&frame.payload));
        }
    }

    reading.is_some()
}
