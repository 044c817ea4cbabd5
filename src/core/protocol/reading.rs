//! Structured readings extracted from inbound frames

use super::{Frame, Opcode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Rows and columns of the thermal sensor
pub const THERMAL_SIDE: usize = 8;
/// Samples in one thermal frame
pub const THERMAL_SAMPLES: usize = THERMAL_SIDE * THERMAL_SIDE;

/// Raw 8x8 thermal matrix, row-major, unscaled sensor values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalReading {
    samples: [u8; THERMAL_SAMPLES],
}

impl ThermalReading {
    /// Build from exactly 64 payload bytes
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let samples: [u8; THERMAL_SAMPLES] = payload.try_into().ok()?;
        Some(Self { samples })
    }

    /// Sample at `row`, `col`
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row < THERMAL_SIDE && col < THERMAL_SIDE {
            Some(self.samples[row * THERMAL_SIDE + col])
        } else {
            None
        }
    }

    /// One row of samples
    pub fn row(&self, row: usize) -> Option<&[u8]> {
        let start = row.checked_mul(THERMAL_SIDE)?;
        self.samples.get(start..start.checked_add(THERMAL_SIDE)?)
    }

    /// All samples in row-major order
    pub fn samples(&self) -> &[u8; THERMAL_SAMPLES] {
        &self.samples
    }

    /// Base64 (standard, padded) of the raw samples
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.samples)
    }
}

/// Bus body for `thermal_reading`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalReadingMessage {
    /// Base64 of 64 raw samples
    pub reading: String,
}

impl From<&ThermalReading> for ThermalReadingMessage {
    fn from(r: &ThermalReading) -> Self {
        Self {
            reading: r.to_base64(),
        }
    }
}

impl ThermalReadingMessage {
    /// Decode the carried reading
    pub fn decode(&self) -> Option<ThermalReading> {
        let bytes = STANDARD.decode(&self.reading).ok()?;
        ThermalReading::from_payload(&bytes)
    }
}

/// A decoded sensor result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    /// Thermal camera frame
    Thermal(ThermalReading),
}

impl Reading {
    /// Interpret an inbound frame; frames that carry no reading yield `None`
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        match frame.opcode {
            Opcode::SendThermalReading => match ThermalReading::from_payload(&frame.payload) {
                Some(t) => Some(Reading::Thermal(t)),
                None => {
                    tracing::warn!(
                        "thermal frame with {} samples, expected {}",
                        frame.payload.len(),
                        THERMAL_SAMPLES
                    );
                    None
                }
            },
            other => {
                tracing::debug!("ignoring inbound {} frame", other);
                None
            }
        }
    }

    /// Topic name under the reading prefix
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            Reading::Thermal(_) => "thermal_reading",
        }
    }

    /// JSON body for publication
    pub fn to_bus_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Reading::Thermal(t) => serde_json::to_vec(&ThermalReadingMessage::from(t)),
        }
    }
}
