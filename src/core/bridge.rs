//! Bus to peripheral bridge
//!
//! A single task owns the transport and multiplexes everything that touches
//! it: bus commands, decoder polling, the periodic thermal request and the
//! reopen after a device reset. Writes therefore never interleave and no
//! lock is held across I/O.
//!
//! ```text
//! bus ──> router ──> encoder ──> transport
//! bus <── reading <── decoder <── transport
//! ```

use crate::core::bus::{BusError, BusMessage, BusPublisher};
use crate::core::command::Command;
use crate::core::logger::TrafficLogger;
use crate::core::protocol::{DecoderConfig, DecoderStats, FrameDecoder, Opcode, Reading};
use crate::core::router::{CommandRouter, DEFAULT_COMMAND_PREFIX, DEFAULT_READING_PREFIX};
use crate::core::transport::{TransportError, TransportStats, TransportTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Log frames instead of opening the serial port
    pub dry_run: bool,
    /// Prefix of command topics
    pub command_prefix: String,
    /// Prefix of reading topics
    pub reading_prefix: String,
    /// Decoder poll period in milliseconds
    pub poll_interval_ms: u64,
    /// Wait between closing and reopening the port on reset
    pub reset_grace_ms: u64,
    /// Emit REQUEST_THERMAL_READING on this period when set
    pub thermal_request_interval_ms: Option<u64>,
    /// Discard inbound frames with a bad checksum
    pub verify_checksum: bool,
    /// Largest accepted inbound length field
    pub max_frame_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            reading_prefix: DEFAULT_READING_PREFIX.to_string(),
            poll_interval_ms: 10,
            reset_grace_ms: 5000,
            thermal_request_interval_ms: None,
            verify_checksum: true,
            max_frame_len: 2048,
        }
    }
}

impl BridgeConfig {
    /// Decoder poll period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Reopen delay after a reset
    pub fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.reset_grace_ms)
    }

    /// Thermal request period, if enabled
    pub fn thermal_request_interval(&self) -> Option<Duration> {
        self.thermal_request_interval_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Decoder settings derived from this configuration
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            verify_checksum: self.verify_checksum,
            max_frame_len: self.max_frame_len,
        }
    }

    /// Routing table for the configured prefixes
    pub fn router(&self) -> CommandRouter {
        CommandRouter::new(&self.command_prefix, &self.reading_prefix)
    }
}

/// Bridge state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    /// Not started or finished
    #[default]
    Stopped,
    /// Device open, commands flowing
    Running,
    /// Device closed, waiting to reopen
    Resetting,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bus messages on a routed topic
    pub commands_received: u64,
    /// Frames handed to the transport
    pub commands_sent: u64,
    /// Commands dropped (invalid, or arriving during a reset)
    pub commands_dropped: u64,
    /// Frames decoded from the device
    pub frames_received: u64,
    /// Readings published on the bus
    pub readings_published: u64,
    /// Publish failures
    pub publish_errors: u64,
    /// Failed writes
    pub write_errors: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Completed device resets
    pub resets: u64,
    /// Transport counters
    pub transport: TransportStats,
    /// Decoder counters
    pub decoder: DecoderStats,
}

/// Bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Initial open failed
    #[error("Failed to open device: {0}")]
    Transport(#[from] TransportError),

    /// Reopen after reset failed
    #[error("Device did not come back after reset: {0}")]
    ReopenFailed(#[source] TransportError),
}

impl BridgeError {
    /// Underlying transport error
    pub fn transport_error(&self) -> &TransportError {
        match self {
            BridgeError::Transport(e) | BridgeError::ReopenFailed(e) => e,
        }
    }
}

/// Bus to peripheral bridge
pub struct Bridge {
    transport: Box<dyn TransportTrait>,
    router: CommandRouter,
    decoder: FrameDecoder,
    config: BridgeConfig,
    state: BridgeState,
    stats: BridgeStats,
    traffic: Option<TrafficLogger>,
}

impl Bridge {
    /// Create a bridge over an unopened transport
    pub fn new(transport: Box<dyn TransportTrait>, config: BridgeConfig) -> Self {
        Self {
            transport,
            router: config.router(),
            decoder: FrameDecoder::new(config.decoder_config()),
            config,
            state: BridgeState::Stopped,
            stats: BridgeStats::default(),
            traffic: None,
        }
    }

    /// Record every frame in a traffic log
    #[must_use]
    pub fn with_traffic_log(mut self, logger: TrafficLogger) -> Self {
        self.traffic = Some(logger);
        self
    }

    /// Routing table in use
    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Current state
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            transport: self.transport.stats(),
            decoder: self.decoder.stats(),
            ..self.stats.clone()
        }
    }

    /// Run until `shutdown` fires
    ///
    /// Failing to open the device at start, or to reopen it after a reset,
    /// ends the bridge with an error. Any other I/O failure is logged and
    /// the loop keeps going.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<BusMessage>,
        publisher: Arc<dyn BusPublisher>,
        shutdown: CancellationToken,
    ) -> Result<BridgeStats, BridgeError> {
        self.transport.open().await?;
        self.state = BridgeState::Running;
        tracing::info!(
            "bridge running on {} ({} topics)",
            self.transport.connection_info(),
            self.router.topics().len()
        );

        let mut poll = time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut thermal = self.config.thermal_request_interval().map(|period| {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let mut reopen_at: Option<Instant> = None;
        let mut intake_open = true;

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(()),

                _ = wait_until(reopen_at), if reopen_at.is_some() => {
                    reopen_at = None;
                    if let Err(e) = self.reopen().await {
                        break Err(e);
                    }
                }

                msg = inbound.recv(), if intake_open => match msg {
                    Some(msg) => {
                        if let Some(at) = self.handle_message(msg).await {
                            reopen_at = Some(at);
                        }
                    }
                    None => {
                        tracing::debug!("bus intake closed");
                        intake_open = false;
                    }
                },

                _ = poll.tick(), if self.state == BridgeState::Running => {
                    self.poll_device(publisher.as_ref()).await;
                }

                _ = tick(&mut thermal), if thermal.is_some() && self.state == BridgeState::Running => {
                    self.dispatch(Command::RequestThermalReading).await;
                }
            }
        };

        self.stop().await;
        result.map(|()| self.stats())
    }

    /// Route one bus message; returns the reopen deadline if it reset the device
    async fn handle_message(&mut self, msg: BusMessage) -> Option<Instant> {
        if self.router.lookup(&msg.topic).is_none() {
            tracing::trace!("ignoring {}", msg.topic);
            return None;
        }
        self.stats.commands_received += 1;

        let Some(command) = self.router.handle(&msg.topic, &msg.payload) else {
            self.stats.commands_dropped += 1;
            return None;
        };

        if self.state != BridgeState::Running {
            tracing::warn!("device resetting, dropping {}", command);
            self.stats.commands_dropped += 1;
            return None;
        }

        self.dispatch(command).await
    }

    async fn dispatch(&mut self, command: Command) -> Option<Instant> {
        let frame = match command.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("cannot encode {}: {}", command, e);
                self.stats.commands_dropped += 1;
                return None;
            }
        };

        self.write_frame(&frame, command.opcode()).await;

        if command == Command::Reset {
            self.begin_reset().await;
            return Some(Instant::now() + self.config.reset_grace());
        }
        None
    }

    async fn write_frame(&mut self, frame: &[u8], opcode: Opcode) {
        if let Some(traffic) = self.traffic.as_mut() {
            traffic.log_tx(frame, Some(opcode.name()));
        }

        match self.transport.send(frame).await {
            Ok(n) if n == frame.len() => {
                self.stats.commands_sent += 1;
                tracing::debug!("sent {} ({} bytes)", opcode, n);
            }
            Ok(n) => {
                self.stats.write_errors += 1;
                let e = TransportError::ShortWrite {
                    written: n,
                    expected: frame.len(),
                };
                tracing::warn!("write of {} failed: {}", opcode, e);
            }
            Err(e) => {
                self.stats.write_errors += 1;
                tracing::warn!("write of {} failed: {}", opcode, e);
            }
        }
    }

    async fn begin_reset(&mut self) {
        self.state = BridgeState::Resetting;
        self.decoder.clear();
        if let Err(e) = self.transport.close().await {
            tracing::warn!("close for reset failed: {}", e);
        }
        tracing::info!(
            "peripheral reset, reopening in {} ms",
            self.config.reset_grace_ms
        );
    }

    async fn reopen(&mut self) -> Result<(), BridgeError> {
        match self.transport.open().await {
            Ok(()) => {
                self.state = BridgeState::Running;
                self.stats.resets += 1;
                tracing::info!("reopened {}", self.transport.connection_info());
                Ok(())
            }
            Err(e) => {
                tracing::error!("reopen after reset failed: {}", e);
                Err(BridgeError::ReopenFailed(e))
            }
        }
    }

    async fn poll_device(&mut self, publisher: &dyn BusPublisher) {
        let frames = match self.decoder.poll(self.transport.as_mut()).await {
            Ok(frames) => frames,
            Err(e) => {
                self.stats.read_errors += 1;
                tracing::warn!("serial read failed: {}", e);
                return;
            }
        };

        for decoded in frames {
            self.stats.frames_received += 1;
            let frame = &decoded.frame;
            if let Some(traffic) = self.traffic.as_mut() {
                traffic.log_rx(&decoded.raw, Some(frame.opcode.name()));
            }
            if let Some(reading) = Reading::from_frame(frame) {
                self.publish(publisher, &reading);
            }
        }
    }

    fn publish(&mut self, publisher: &dyn BusPublisher, reading: &Reading) {
        let topic = format!("{}/{}", self.config.reading_prefix, reading.topic_suffix());
        let body = match reading.to_bus_payload() {
            Ok(body) => body,
            Err(e) => {
                self.stats.publish_errors += 1;
                tracing::warn!("cannot serialize reading for {}: {}", topic, e);
                return;
            }
        };

        match publisher.publish(&topic, &body) {
            Ok(()) => {
                self.stats.readings_published += 1;
                tracing::debug!("published {}", topic);
            }
            Err(BusError::NoSubscribers(_)) => {
                tracing::trace!("no subscribers for {}", topic);
            }
            Err(e) => {
                self.stats.publish_errors += 1;
                tracing::warn!("publish on {} failed: {}", topic, e);
            }
        }
    }

    async fn stop(&mut self) {
        if self.transport.is_open() {
            if let Err(e) = self.transport.close().await {
                tracing::warn!("close failed: {}", e);
            }
        }
        if let Some(traffic) = self.traffic.as_mut() {
            traffic.flush();
        }
        self.state = BridgeState::Stopped;

        let stats = self.stats();
        tracing::info!(
            "bridge stopped: {} commands sent, {} dropped, {} readings published, {} bytes out, {} bytes in",
            stats.commands_sent,
            stats.commands_dropped,
            stats.readings_published,
            stats.transport.bytes_sent,
            stats.transport.bytes_received
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::LocalBus;
    use crate::core::protocol::{encode, encode_frame, Direction, ThermalReadingMessage};
    use crate::core::transport::{MockDevice, MockDeviceHandle, MockTransportTrait};

    struct Harness {
        tx: mpsc::Sender<BusMessage>,
        bus: LocalBus,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<Result<BridgeStats, BridgeError>>,
    }

    fn spawn(transport: Box<dyn TransportTrait>, config: BridgeConfig) -> Harness {
        let (tx, rx) = mpsc::channel(64);
        let bus = LocalBus::default();
        let shutdown = CancellationToken::new();
        let mut bridge = Bridge::new(transport, config);
        let publisher: Arc<dyn BusPublisher> = Arc::new(bus.clone());
        let token = shutdown.clone();
        let task = tokio::spawn(async move { bridge.run(rx, publisher, token).await });
        Harness {
            tx,
            bus,
            shutdown,
            task,
        }
    }

    fn spawn_device(config: BridgeConfig) -> (Harness, MockDeviceHandle) {
        let (device, handle) = MockDevice::new();
        (spawn(Box::new(device), config), handle)
    }

    async fn send(h: &Harness, topic: &str, body: &str) {
        h.tx.send(BusMessage::new(topic.to_string(), body.to_string()))
            .await
            .unwrap();
    }

    async fn finish(h: Harness) -> Result<BridgeStats, BridgeError> {
        h.shutdown.cancel();
        h.task.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_reaches_device() {
        let (h, device) = spawn_device(BridgeConfig::default());
        send(&h, "vrc/pcc/set_servo_open_close", r#"{"servo":2,"action":"open"}"#).await;
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            device.written(),
            vec![vec![0x24, 0x50, 0x3C, 0x00, 0x03, 0x00, 0x02, 0x96, 0xE3]]
        );
        let stats = finish(h).await.unwrap();
        assert_eq!(stats.commands_sent, 1);
        assert!(!device.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_and_foreign_messages() {
        let (h, device) = spawn_device(BridgeConfig::default());
        send(&h, "vrc/pcc/set_servo_pct", r#"{"servo":1,"percent":150}"#).await;
        send(&h, "vrc/pcc/set_switch_on", "garbage").await;
        send(&h, "vrc/other/set_laser_on", "{}").await;
        time::sleep(Duration::from_millis(50)).await;

        assert!(device.written().is_empty());
        let stats = finish(h).await.unwrap();
        assert_eq!(stats.commands_received, 2);
        assert_eq!(stats.commands_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thermal_reading_published() {
        let (h, device) = spawn_device(BridgeConfig::default());
        let mut sub = h.bus.subscribe();
        let samples: Vec<u8> = (0..64).collect();
        device.reply_to(
            Opcode::RequestThermalReading,
            encode_frame(Direction::ToHost, Opcode::SendThermalReading, &samples).unwrap(),
        );

        send(&h, "vrc/thermal/request_thermal_reading", "{}").await;
        let msg = time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(msg.topic, "vrc/thermal/thermal_reading");
        let body: ThermalReadingMessage = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(body.decode().unwrap().samples().as_slice(), samples.as_slice());

        let stats = finish(h).await.unwrap();
        assert_eq!(stats.readings_published, 1);
        assert_eq!(stats.decoder.frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_then_reopens() {
        let config = BridgeConfig {
            reset_grace_ms: 5000,
            ..BridgeConfig::default()
        };
        let (h, device) = spawn_device(config);

        send(&h, "vrc/pcc/reset", "{}").await;
        time::sleep(Duration::from_millis(100)).await;
        assert!(!device.is_open());
        assert_eq!(device.written(), vec![encode(Opcode::ResetVrcPeriph, &[]).unwrap()]);

        // Commands during the grace period are dropped
        send(&h, "vrc/pcc/set_laser_on", "{}").await;
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(device.written().len(), 1);

        time::sleep(Duration::from_secs(5)).await;
        assert!(device.is_open());
        assert_eq!(device.open_count(), 2);

        send(&h, "vrc/pcc/set_laser_on", "{}").await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.written_opcodes(), vec![13, 10]);

        let stats = finish(h).await.unwrap();
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.commands_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_failure_is_fatal() {
        let (h, device) = spawn_device(BridgeConfig::default());
        time::sleep(Duration::from_millis(20)).await;
        device.fail_open(true);
        send(&h, "vrc/pcc/reset", "{}").await;

        let result = time::timeout(Duration::from_secs(10), h.task).await.unwrap().unwrap();
        assert!(matches!(result, Err(BridgeError::ReopenFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_thermal_request() {
        let config = BridgeConfig {
            thermal_request_interval_ms: Some(200),
            ..BridgeConfig::default()
        };
        let (h, device) = spawn_device(config);
        time::sleep(Duration::from_millis(1000)).await;
        finish(h).await.unwrap();

        let requests = device
            .written_opcodes()
            .into_iter()
            .filter(|&op| op == Opcode::RequestThermalReading.code())
            .count();
        assert!((5..=6).contains(&requests), "got {requests} requests");
    }

    #[tokio::test]
    async fn test_open_failure_is_fatal() {
        let mut mock = MockTransportTrait::new();
        mock.expect_open()
            .returning(|| Err(TransportError::PortNotFound("/dev/ttyACM9".to_string())));
        mock.expect_is_open().return_const(false);
        mock.expect_stats().returning(TransportStats::default);

        let h = spawn(Box::new(mock), BridgeConfig::default());
        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::Transport(TransportError::PortNotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_and_read_errors_keep_running() {
        let mut mock = MockTransportTrait::new();
        mock.expect_open().returning(|| Ok(()));
        mock.expect_is_open().return_const(true);
        mock.expect_close().returning(|| Ok(()));
        mock.expect_connection_info().return_const("mock".to_string());
        mock.expect_stats().returning(TransportStats::default);
        mock.expect_bytes_available()
            .returning(|| Err(TransportError::NotConnected));
        mock.expect_send().returning(|_| {
            Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            )))
        });

        let h = spawn(Box::new(mock), BridgeConfig::default());
        send(&h, "vrc/pcc/set_laser_on", "{}").await;
        send(&h, "vrc/pcc/set_laser_off", "{}").await;
        time::sleep(Duration::from_millis(100)).await;

        let stats = finish(h).await.unwrap();
        assert_eq!(stats.write_errors, 2);
        assert_eq!(stats.commands_sent, 0);
        assert!(stats.read_errors > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_log_records_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.log");
        let logger = TrafficLogger::open(&path, crate::core::logger::LogFormat::Text).unwrap();

        let (device, _handle) = MockDevice::new();
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let mut bridge = Bridge::new(Box::new(device), BridgeConfig::default()).with_traffic_log(logger);
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = bridge.run(rx, Arc::new(LocalBus::default()), token).await;
            drop(bridge);
            result
        });

        tx.send(BusMessage::new("vrc/pcc/set_laser_on", "{}")).await.unwrap();
        time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("TX 24 50 3C 00 01 0A"));
        assert!(content.contains("SET_LASER_ON"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_log_keeps_received_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.jsonl");
        let logger = TrafficLogger::open(&path, crate::core::logger::LogFormat::Jsonl).unwrap();

        let mut corrupt =
            encode_frame(Direction::ToHost, Opcode::SendThermalReading, &[1; 64]).unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let (device, handle) = MockDevice::new();
        handle.inject(&corrupt);
        let config = BridgeConfig {
            verify_checksum: false,
            ..BridgeConfig::default()
        };
        let (_tx, rx) = mpsc::channel::<BusMessage>(1);
        let shutdown = CancellationToken::new();
        let mut bridge = Bridge::new(Box::new(device), config).with_traffic_log(logger);
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = bridge.run(rx, Arc::new(LocalBus::default()), token).await;
            drop(bridge);
            result
        });

        time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.frames_received, 1);

        let content = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["direction"], "Received");
        assert_eq!(entry["frame"], hex::encode(&corrupt));
    }
}
