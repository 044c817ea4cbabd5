//! Bus topic to command routing
//!
//! The routing table is built once from the configured prefixes and never
//! mutated. Every topic has a typed body record; a body that does not match
//! its record is logged with the topic name and dropped.

use crate::core::command::{Command, CommandError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Default prefix for command topics
pub const DEFAULT_COMMAND_PREFIX: &str = "vrc/pcc";
/// Default prefix for reading topics
pub const DEFAULT_READING_PREFIX: &str = "vrc/thermal";

/// Routing error types
#[derive(Error, Debug)]
pub enum RouteError {
    /// Body is not JSON or misses a required field
    #[error("Malformed body on {topic}: {source}")]
    Malformed {
        /// Topic the message arrived on
        topic: String,
        /// Parser error
        source: serde_json::Error,
    },

    /// Arguments failed validation
    #[error("Rejected command on {topic}: {source}")]
    Rejected {
        /// Topic the message arrived on
        topic: String,
        /// Validation error
        source: CommandError,
    },
}

/// Semantic action behind a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// `set_base_color`
    SetBaseColor,
    /// `set_temp_color`
    SetTempColor,
    /// `set_servo_open_close`
    SetServoOpenClose,
    /// `set_servo_min`
    SetServoMin,
    /// `set_servo_max`
    SetServoMax,
    /// `set_servo_pct`
    SetServoPct,
    /// `set_pixel_cycle`
    SetPixelCycle,
    /// `set_trigger_switch`
    SetTriggerSwitch,
    /// `set_switch_on`
    SetSwitchOn,
    /// `set_switch_off`
    SetSwitchOff,
    /// `set_laser_on`
    SetLaserOn,
    /// `set_laser_off`
    SetLaserOff,
    /// `reset`
    Reset,
    /// `check_servo_controller`
    CheckServoController,
    /// `request_thermal_reading`
    RequestThermalReading,
}

impl Route {
    /// Routes served under the command prefix
    pub fn all() -> &'static [Route] {
        &[
            Route::SetBaseColor,
            Route::SetTempColor,
            Route::SetServoOpenClose,
            Route::SetServoMin,
            Route::SetServoMax,
            Route::SetServoPct,
            Route::SetPixelCycle,
            Route::SetTriggerSwitch,
            Route::SetSwitchOn,
            Route::SetSwitchOff,
            Route::SetLaserOn,
            Route::SetLaserOff,
            Route::Reset,
            Route::CheckServoController,
            Route::RequestThermalReading,
        ]
    }

    /// Topic name below the prefix
    pub fn suffix(&self) -> &'static str {
        match self {
            Route::SetBaseColor => "set_base_color",
            Route::SetTempColor => "set_temp_color",
            Route::SetServoOpenClose => "set_servo_open_close",
            Route::SetServoMin => "set_servo_min",
            Route::SetServoMax => "set_servo_max",
            Route::SetServoPct => "set_servo_pct",
            Route::SetPixelCycle => "set_pixel_cycle",
            Route::SetTriggerSwitch => "set_trigger_switch",
            Route::SetSwitchOn => "set_switch_on",
            Route::SetSwitchOff => "set_switch_off",
            Route::SetLaserOn => "set_laser_on",
            Route::SetLaserOff => "set_laser_off",
            Route::Reset => "reset",
            Route::CheckServoController => "check_servo_controller",
            Route::RequestThermalReading => "request_thermal_reading",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ColorBody {
    wrgb: Value,
}

#[derive(Debug, Deserialize)]
struct TempColorBody {
    wrgb: Value,
    time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ServoOpenCloseBody {
    servo: u8,
    action: String,
}

#[derive(Debug, Deserialize)]
struct ServoMinBody {
    servo: u8,
    min_pulse: f64,
}

#[derive(Debug, Deserialize)]
struct ServoMaxBody {
    servo: u8,
    max_pulse: f64,
}

#[derive(Debug, Deserialize)]
struct ServoPctBody {
    servo: u8,
    percent: f64,
}

#[derive(Debug, Deserialize)]
struct PixelCycleBody {
    target_pixel: u8,
    delay_ms: u8,
}

#[derive(Debug, Deserialize)]
struct TriggerSwitchBody {
    which_switch: u8,
    how_long: u8,
}

#[derive(Debug, Deserialize)]
struct SwitchBody {
    which_switch: u8,
}

/// Maps bus topics to validated commands
#[derive(Debug, Clone)]
pub struct CommandRouter {
    table: HashMap<String, Route>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_PREFIX, DEFAULT_READING_PREFIX)
    }
}

impl CommandRouter {
    /// Build the routing table
    pub fn new(command_prefix: &str, reading_prefix: &str) -> Self {
        let mut table: HashMap<String, Route> = Route::all()
            .iter()
            .map(|r| (format!("{}/{}", command_prefix, r.suffix()), *r))
            .collect();
        table.insert(
            format!("{}/{}", reading_prefix, Route::RequestThermalReading.suffix()),
            Route::RequestThermalReading,
        );
        Self { table }
    }

    /// Topics to subscribe to, sorted
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.table.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    /// Route for a topic, if any
    pub fn lookup(&self, topic: &str) -> Option<Route> {
        self.table.get(topic).copied()
    }

    /// Route a message; `Ok(None)` means the topic is not ours
    pub fn route(&self, topic: &str, raw: &[u8]) -> Result<Option<Command>, RouteError> {
        let Some(route) = self.lookup(topic) else {
            return Ok(None);
        };
        build(route, topic, raw).map(Some)
    }

    /// Route a message, logging and dropping anything that fails
    pub fn handle(&self, topic: &str, raw: &[u8]) -> Option<Command> {
        match self.route(topic, raw) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("dropping message: {}", e);
                None
            }
        }
    }
}

fn parse<T: DeserializeOwned>(topic: &str, raw: &[u8]) -> Result<T, RouteError> {
    serde_json::from_slice(raw).map_err(|source| RouteError::Malformed {
        topic: topic.to_string(),
        source,
    })
}

fn build(route: Route, topic: &str, raw: &[u8]) -> Result<Command, RouteError> {
    let rejected = |source: CommandError| RouteError::Rejected {
        topic: topic.to_string(),
        source,
    };

    let command = match route {
        Route::SetBaseColor => {
            let body: ColorBody = parse(topic, raw)?;
            Command::base_color(wrgb_slice(&body.wrgb))
        }
        Route::SetTempColor => {
            let body: TempColorBody = parse(topic, raw)?;
            Command::temp_color(wrgb_slice(&body.wrgb), body.time)
        }
        Route::SetServoOpenClose => {
            let body: ServoOpenCloseBody = parse(topic, raw)?;
            Command::servo_open_close(body.servo, &body.action).map_err(rejected)?
        }
        Route::SetServoMin => {
            let body: ServoMinBody = parse(topic, raw)?;
            Command::servo_min(body.servo, body.min_pulse).map_err(rejected)?
        }
        Route::SetServoMax => {
            let body: ServoMaxBody = parse(topic, raw)?;
            Command::servo_max(body.servo, body.max_pulse).map_err(rejected)?
        }
        Route::SetServoPct => {
            let body: ServoPctBody = parse(topic, raw)?;
            Command::servo_pct(body.servo, body.percent).map_err(rejected)?
        }
        Route::SetPixelCycle => {
            let body: PixelCycleBody = parse(topic, raw)?;
            Command::PixelCycle {
                pixel: body.target_pixel,
                delay_ms: body.delay_ms,
            }
        }
        Route::SetTriggerSwitch => {
            let body: TriggerSwitchBody = parse(topic, raw)?;
            Command::TriggerSwitch {
                switch: body.which_switch,
                how_long: body.how_long,
            }
        }
        Route::SetSwitchOn => {
            let body: SwitchBody = parse(topic, raw)?;
            Command::SwitchOn {
                switch: body.which_switch,
            }
        }
        Route::SetSwitchOff => {
            let body: SwitchBody = parse(topic, raw)?;
            Command::SwitchOff {
                switch: body.which_switch,
            }
        }
        Route::SetLaserOn | Route::SetLaserOff | Route::Reset | Route::CheckServoController
        | Route::RequestThermalReading => {
            // No fields, but the body must still be JSON
            let _: Value = parse(topic, raw)?;
            match route {
                Route::SetLaserOn => Command::LaserOn,
                Route::SetLaserOff => Command::LaserOff,
                Route::Reset => Command::Reset,
                Route::CheckServoController => Command::CheckServoController,
                _ => Command::RequestThermalReading,
            }
        }
    };

    tracing::debug!("{} -> {}", topic, command);
    Ok(command)
}

fn wrgb_slice(value: &Value) -> &[Value] {
    value.as_array().map_or(&[], Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::Opcode;

    fn router() -> CommandRouter {
        CommandRouter::default()
    }

    fn payload_for(topic: &str, body: &str) -> Option<Vec<u8>> {
        router()
            .handle(&format!("vrc/pcc/{topic}"), body.as_bytes())
            .map(|c| c.payload())
    }

    #[test]
    fn test_unknown_topic_ignored() {
        assert!(router().route("vrc/pcc/set_warp_drive", b"{}").unwrap().is_none());
        assert!(router().route("other/set_laser_on", b"{}").unwrap().is_none());
    }

    #[test]
    fn test_base_color_invalid_elements() {
        assert_eq!(payload_for("set_base_color", r#"{"wrgb":[300,-1,0,0]}"#), Some(vec![0, 0, 0, 0]));
        assert_eq!(payload_for("set_base_color", r#"{"wrgb":"red"}"#), Some(vec![0, 0, 0, 0]));
        assert_eq!(payload_for("set_base_color", r#"{"wrgb":[9,8,7,6]}"#), Some(vec![9, 8, 7, 6]));
    }

    #[test]
    fn test_temp_color_default_time() {
        let payload = payload_for("set_temp_color", r#"{"wrgb":[1,2,3,4]}"#).unwrap();
        assert_eq!(&payload[4..], &0.5f32.to_le_bytes());
        let payload = payload_for("set_temp_color", r#"{"wrgb":[1,2,3,4],"time":1.25}"#).unwrap();
        assert_eq!(&payload[4..], &1.25f32.to_le_bytes());
    }

    #[test]
    fn test_servo_open_close() {
        assert_eq!(payload_for("set_servo_open_close", r#"{"servo":2,"action":"open"}"#), Some(vec![2, 150]));
        assert_eq!(payload_for("set_servo_open_close", r#"{"servo":2,"action":"close"}"#), Some(vec![2, 100]));
        assert_eq!(payload_for("set_servo_open_close", r#"{"servo":2,"action":"wiggle"}"#), None);
    }

    #[test]
    fn test_servo_pct_out_of_range_dropped() {
        let err = router()
            .route("vrc/pcc/set_servo_pct", br#"{"servo":1,"percent":150}"#)
            .unwrap_err();
        assert!(matches!(err, RouteError::Rejected { .. }));
        assert_eq!(payload_for("set_servo_pct", r#"{"servo":1,"percent":50.5}"#), Some(vec![1, 50]));
    }

    #[test]
    fn test_servo_pulse_fields() {
        assert_eq!(payload_for("set_servo_min", r#"{"servo":0,"min_pulse":120}"#), Some(vec![0, 120]));
        assert_eq!(payload_for("set_servo_max", r#"{"servo":0,"max_pulse":240}"#), Some(vec![0, 240]));
        assert_eq!(payload_for("set_servo_max", r#"{"servo":0,"max_pulse":1200}"#), None);
    }

    #[test]
    fn test_pixel_cycle_reversed() {
        assert_eq!(
            payload_for("set_pixel_cycle", r#"{"target_pixel":16,"delay_ms":250}"#),
            Some(vec![250, 16])
        );
        assert_eq!(
            payload_for("set_trigger_switch", r#"{"which_switch":2,"how_long":100}"#),
            Some(vec![100, 2])
        );
    }

    #[test]
    fn test_switch_off_routes_to_switch_off() {
        let cmd = router()
            .handle("vrc/pcc/set_switch_off", br#"{"which_switch":4}"#)
            .unwrap();
        assert_eq!(cmd.opcode(), Opcode::SetSwitchOff);
        assert_eq!(cmd.payload(), vec![4]);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let err = router()
            .route("vrc/pcc/set_servo_min", br#"{"servo":1}"#)
            .unwrap_err();
        assert!(matches!(err, RouteError::Malformed { ref topic, .. } if topic == "vrc/pcc/set_servo_min"));
        assert!(router().handle("vrc/pcc/set_switch_on", b"not json").is_none());
    }

    #[test]
    fn test_byte_overflow_is_malformed() {
        assert!(matches!(
            router().route("vrc/pcc/set_switch_on", br#"{"which_switch":300}"#),
            Err(RouteError::Malformed { .. })
        ));
    }

    #[test]
    fn test_opcode_only_topics() {
        let r = router();
        assert_eq!(r.handle("vrc/pcc/set_laser_on", b"{}"), Some(Command::LaserOn));
        assert_eq!(r.handle("vrc/pcc/set_laser_off", b"{}"), Some(Command::LaserOff));
        assert_eq!(r.handle("vrc/pcc/reset", b"{}"), Some(Command::Reset));
        assert_eq!(
            r.handle("vrc/pcc/check_servo_controller", b"{}"),
            Some(Command::CheckServoController)
        );
        assert_eq!(
            r.handle("vrc/thermal/request_thermal_reading", b"{}"),
            Some(Command::RequestThermalReading)
        );
    }

    #[test]
    fn test_topics_listing() {
        let r = CommandRouter::new("robot/pcc", "robot/thermal");
        let topics = r.topics();
        assert_eq!(topics.len(), Route::all().len() + 1);
        assert!(topics.contains(&"robot/pcc/set_switch_off"));
        assert!(topics.contains(&"robot/thermal/request_thermal_reading"));
    }
}
