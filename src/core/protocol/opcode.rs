//! Opcode table shared with the peripheral firmware
//!
//! The numeric values are a hardware contract and must never change.

use super::FrameError;
use std::fmt;

/// One-byte operation code carried in every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Drive a servo to its open or closed position
    SetServoOpenClose = 0,
    /// Set a servo's minimum pulse width
    SetServoMin = 1,
    /// Set a servo's maximum pulse width
    SetServoMax = 2,
    /// Move a servo to a percentage of its travel
    SetServoPct = 3,
    /// Set the base color of the status strip
    SetBaseColor = 4,
    /// Flash a temporary color for a duration
    SetTempColor = 5,
    /// Cycle a single pixel
    SetPixelCycle = 6,
    /// Pulse a switch for a period
    SetTriggerSwitch = 7,
    /// Latch a switch on
    SetSwitchOn = 8,
    /// Latch a switch off
    SetSwitchOff = 9,
    /// Turn the laser on
    SetLaserOn = 10,
    /// Turn the laser off
    SetLaserOff = 11,
    /// Ask the board for a thermal frame
    RequestThermalReading = 12,
    /// Reboot the peripheral board
    ResetVrcPeriph = 13,
    /// Check that the servo controller responds
    CheckServoController = 14,
    /// Thermal frame sent by the board
    SendThermalReading = 15,
}

impl Opcode {
    /// Get all opcodes in wire order
    pub fn all() -> &'static [Opcode] {
        &[
            Opcode::SetServoOpenClose,
            Opcode::SetServoMin,
            Opcode::SetServoMax,
            Opcode::SetServoPct,
            Opcode::SetBaseColor,
            Opcode::SetTempColor,
            Opcode::SetPixelCycle,
            Opcode::SetTriggerSwitch,
            Opcode::SetSwitchOn,
            Opcode::SetSwitchOff,
            Opcode::SetLaserOn,
            Opcode::SetLaserOff,
            Opcode::RequestThermalReading,
            Opcode::ResetVrcPeriph,
            Opcode::CheckServoController,
            Opcode::SendThermalReading,
        ]
    }

    /// Wire value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Firmware name of the opcode
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::SetServoOpenClose => "SET_SERVO_OPEN_CLOSE",
            Opcode::SetServoMin => "SET_SERVO_MIN",
            Opcode::SetServoMax => "SET_SERVO_MAX",
            Opcode::SetServoPct => "SET_SERVO_PCT",
            Opcode::SetBaseColor => "SET_BASE_COLOR",
            Opcode::SetTempColor => "SET_TEMP_COLOR",
            Opcode::SetPixelCycle => "SET_PIXEL_CYCLE",
            Opcode::SetTriggerSwitch => "SET_TRIGGER_SWITCH",
            Opcode::SetSwitchOn => "SET_SWITCH_ON",
            Opcode::SetSwitchOff => "SET_SWITCH_OFF",
            Opcode::SetLaserOn => "SET_LASER_ON",
            Opcode::SetLaserOff => "SET_LASER_OFF",
            Opcode::RequestThermalReading => "REQUEST_THERMAL_READING",
            Opcode::ResetVrcPeriph => "RESET_VRC_PERIPH",
            Opcode::CheckServoController => "CHECK_SERVO_CONTROLLER",
            Opcode::SendThermalReading => "SEND_THERMAL_READING",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::all()
            .get(value as usize)
            .copied()
            .ok_or(FrameError::UnknownOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
