//! Telemetry decoding for the status group.

use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::settings::MAX_LEVEL;

/// Registers the status decoder needs.
pub const STATUS_REGISTER_COUNT: usize = 11;

/// Offset applied to every encoded temperature.
pub const TEMPERATURE_OFFSET: i32 = 55;

/// Run state derived from power and rpm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Off,
    Running,
    /// Exactly one of power and rpm is nonzero.
    TransitionOrInvalid,
}

impl RunState {
    pub fn from_power_rpm(power: u16, rpm: u16) -> Self {
        match (power, rpm) {
            (0, 0) => RunState::Off,
            (p, r) if p > 0 && r > 0 => RunState::Running,
            _ => RunState::TransitionOrInvalid,
        }
    }

    pub fn is_ambiguous(self) -> bool {
        self == RunState::TransitionOrInvalid
    }
}

/// One decoded status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatusSnapshot {
    /// Supply voltage in volts.
    pub voltage: f32,
    pub power: u16,
    pub level: u16,
    /// Level as a percentage of the maximum level, rounded.
    pub run_percent: u32,
    pub rpm: u16,
    /// Pressure in the device's unit, two decimals.
    pub pressure: f32,
    pub temperature_a: i32,
    pub temperature_b: i32,
    /// Fields the firmware keeps at zero.
    pub constants: [u16; 3],
    pub error_code: u16,
    pub run_state: RunState,
    pub raw_hex: String,
}

impl DeviceStatusSnapshot {
    pub fn temperature_delta(&self) -> u32 {
        self.temperature_a.abs_diff(self.temperature_b)
    }

    pub fn constants_nominal(&self) -> bool {
        self.constants.iter().all(|&c| c == 0)
    }
}

/// Decode the status group. Pure; `raw_hex` is carried through untouched.
pub fn decode_status(registers: &[u16], raw_hex: &str) -> Result<DeviceStatusSnapshot> {
    if registers.len() < STATUS_REGISTER_COUNT {
        return Err(ProtocolError::TooFewRegisters {
            needed: STATUS_REGISTER_COUNT,
            got: registers.len(),
        });
    }

    let power = registers[1];
    let level = registers[2];
    let rpm = registers[3];

    Ok(DeviceStatusSnapshot {
        voltage: f32::from(registers[0]) / 10.0,
        power,
        level,
        run_percent: run_percent(level),
        rpm,
        pressure: f32::from(registers[5]) / 100.0,
        temperature_a: decode_temperature(registers[8]),
        temperature_b: decode_temperature(registers[9]),
        constants: [registers[4], registers[6], registers[7]],
        error_code: registers[10],
        run_state: RunState::from_power_rpm(power, rpm),
        raw_hex: raw_hex.to_string(),
    })
}

/// `round(level * 100 / MAX_LEVEL)`, half away from zero.
pub fn run_percent(level: u16) -> u32 {
    let max = u32::from(MAX_LEVEL);
    (u32::from(level) * 100 + max / 2) / max
}

pub fn decode_temperature(raw: u16) -> i32 {
    i32::from(raw) - TEMPERATURE_OFFSET
}
