//! Validated peripheral commands
//!
//! Each variant maps to exactly one opcode. Constructors apply the board's
//! argument rules so that an invalid value is either replaced by a safe
//! default or rejected before any bytes are produced.

use crate::core::protocol::{encode, Frame, FrameError, Opcode};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Servo position byte for "open" (above the 128 inflection point)
pub const SERVO_OPEN_POSITION: u8 = 150;
/// Servo position byte for "close"
pub const SERVO_CLOSE_POSITION: u8 = 100;
/// Temporary color duration when none is given, in seconds
pub const DEFAULT_TEMP_COLOR_SECS: f32 = 0.5;
/// Exclusive upper bound for servo pulse values
pub const SERVO_PULSE_LIMIT: f64 = 1000.0;
/// Exclusive upper bound for servo percentages
pub const SERVO_PERCENT_LIMIT: f64 = 100.0;

/// Reasons a command is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Servo action other than open/close
    #[error("Unknown servo action: {0:?}")]
    UnknownAction(String),

    /// Value outside the accepted open interval
    #[error("{field} = {value} outside ({min}, {max})")]
    OutOfRange {
        /// Argument name
        field: &'static str,
        /// Offending value
        value: f64,
        /// Exclusive lower bound
        min: f64,
        /// Exclusive upper bound
        max: f64,
    },

    /// Value does not fit the single payload byte
    #[error("{field} = {value} does not fit in one byte")]
    ByteOverflow {
        /// Argument name
        field: &'static str,
        /// Offending value
        value: f64,
    },
}

/// Servo open/close action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAction {
    /// Open position
    Open,
    /// Closed position
    Close,
}

impl ServoAction {
    /// Position byte sent to the board
    pub fn position(self) -> u8 {
        match self {
            ServoAction::Open => SERVO_OPEN_POSITION,
            ServoAction::Close => SERVO_CLOSE_POSITION,
        }
    }
}

impl std::str::FromStr for ServoAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }
}

/// A command ready for encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Drive a servo open or closed
    ServoOpenClose {
        /// Servo index
        servo: u8,
        /// Target position
        action: ServoAction,
    },
    /// Set minimum pulse
    ServoMin {
        /// Servo index
        servo: u8,
        /// Pulse value
        pulse: u8,
    },
    /// Set maximum pulse
    ServoMax {
        /// Servo index
        servo: u8,
        /// Pulse value
        pulse: u8,
    },
    /// Move to a percentage of travel
    ServoPct {
        /// Servo index
        servo: u8,
        /// Whole percent
        percent: u8,
    },
    /// Base strip color (brightness, red, green, blue)
    BaseColor {
        /// Brightness + RGB
        wrgb: [u8; 4],
    },
    /// Temporary strip color
    TempColor {
        /// Brightness + RGB
        wrgb: [u8; 4],
        /// Seconds to hold the color
        duration: f32,
    },
    /// Cycle one pixel
    PixelCycle {
        /// Target pixel
        pixel: u8,
        /// Step delay in milliseconds
        delay_ms: u8,
    },
    /// Pulse a switch
    TriggerSwitch {
        /// Switch index
        switch: u8,
        /// Pulse length
        how_long: u8,
    },
    /// Latch a switch on
    SwitchOn {
        /// Switch index
        switch: u8,
    },
    /// Latch a switch off
    SwitchOff {
        /// Switch index
        switch: u8,
    },
    /// Laser on
    LaserOn,
    /// Laser off
    LaserOff,
    /// Ask for a thermal frame
    RequestThermalReading,
    /// Reboot the board
    Reset,
    /// Check that the servo controller responds
    CheckServoController,
}

impl Command {
    /// Open/close from a bus action string
    pub fn servo_open_close(servo: u8, action: &str) -> Result<Self, CommandError> {
        Ok(Command::ServoOpenClose {
            servo,
            action: action.parse()?,
        })
    }

    /// Minimum pulse, valid for 0 < pulse < 1000
    pub fn servo_min(servo: u8, pulse: f64) -> Result<Self, CommandError> {
        let pulse = pulse_byte("min_pulse", pulse)?;
        Ok(Command::ServoMin { servo, pulse })
    }

    /// Maximum pulse, valid for 0 < pulse < 1000
    pub fn servo_max(servo: u8, pulse: f64) -> Result<Self, CommandError> {
        let pulse = pulse_byte("max_pulse", pulse)?;
        Ok(Command::ServoMax { servo, pulse })
    }

    /// Percentage, valid for 0 < percent < 100, truncated
    pub fn servo_pct(servo: u8, percent: f64) -> Result<Self, CommandError> {
        check_open_range("percent", percent, 0.0, SERVO_PERCENT_LIMIT)?;
        Ok(Command::ServoPct {
            servo,
            percent: percent.trunc() as u8,
        })
    }

    /// Base color; an invalid array becomes all zeros
    pub fn base_color(wrgb: &[Value]) -> Self {
        Command::BaseColor {
            wrgb: sanitize_wrgb(wrgb),
        }
    }

    /// Temporary color; an invalid array becomes all zeros
    pub fn temp_color(wrgb: &[Value], duration: Option<f64>) -> Self {
        Command::TempColor {
            wrgb: sanitize_wrgb(wrgb),
            duration: duration.map_or(DEFAULT_TEMP_COLOR_SECS, |d| d as f32),
        }
    }

    /// Opcode for this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::ServoOpenClose { .. } => Opcode::SetServoOpenClose,
            Command::ServoMin { .. } => Opcode::SetServoMin,
            Command::ServoMax { .. } => Opcode::SetServoMax,
            Command::ServoPct { .. } => Opcode::SetServoPct,
            Command::BaseColor { .. } => Opcode::SetBaseColor,
            Command::TempColor { .. } => Opcode::SetTempColor,
            Command::PixelCycle { .. } => Opcode::SetPixelCycle,
            Command::TriggerSwitch { .. } => Opcode::SetTriggerSwitch,
            Command::SwitchOn { .. } => Opcode::SetSwitchOn,
            Command::SwitchOff { .. } => Opcode::SetSwitchOff,
            Command::LaserOn => Opcode::SetLaserOn,
            Command::LaserOff => Opcode::SetLaserOff,
            Command::RequestThermalReading => Opcode::RequestThermalReading,
            Command::Reset => Opcode::ResetVrcPeriph,
            Command::CheckServoController => Opcode::CheckServoController,
        }
    }

    /// Payload bytes after the opcode
    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Command::ServoOpenClose { servo, action } => vec![servo, action.position()],
            Command::ServoMin { servo, pulse } | Command::ServoMax { servo, pulse } => {
                vec![servo, pulse]
            }
            Command::ServoPct { servo, percent } => vec![servo, percent],
            Command::BaseColor { wrgb } => wrgb.to_vec(),
            Command::TempColor { wrgb, duration } => {
                let mut out = wrgb.to_vec();
                out.extend_from_slice(&duration.to_le_bytes());
                out
            }
            // Firmware reads these two argument pairs in reverse order
            Command::PixelCycle { pixel, delay_ms } => vec![delay_ms, pixel],
            Command::TriggerSwitch { switch, how_long } => vec![how_long, switch],
            Command::SwitchOn { switch } | Command::SwitchOff { switch } => vec![switch],
            Command::LaserOn
            | Command::LaserOff
            | Command::RequestThermalReading
            | Command::Reset
            | Command::CheckServoController => Vec::new(),
        }
    }

    /// As an outbound frame
    pub fn to_frame(&self) -> Frame {
        Frame::outbound(self.opcode(), self.payload())
    }

    /// Wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.opcode(), &self.payload())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.opcode(), self.payload())
    }
}

fn check_open_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), CommandError> {
    if value > min && value < max {
        Ok(())
    } else {
        Err(CommandError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn pulse_byte(field: &'static str, value: f64) -> Result<u8, CommandError> {
    check_open_range(field, value, 0.0, SERVO_PULSE_LIMIT)?;
    let whole = value.trunc();
    if whole > u8::MAX as f64 {
        return Err(CommandError::ByteOverflow { field, value });
    }
    Ok(whole as u8)
}

/// Four integers in 0..=255, otherwise the whole array is zeroed
fn sanitize_wrgb(values: &[Value]) -> [u8; 4] {
    let parsed: Option<Vec<u8>> = values
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect();

    match parsed.as_deref() {
        Some(&[w, r, g, b]) => [w, r, g, b],
        _ => {
            tracing::debug!("invalid wrgb {:?}, substituting zeros", values);
            [0; 4]
        }
    }
}
