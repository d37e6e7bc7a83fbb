//! User-editable device settings and their register encoding.
//!
//! Packed words carry a temperature in the high byte (offset by
//! [`TEMPERATURE_OFFSET`](crate::status::TEMPERATURE_OFFSET)) and a
//! hysteresis byte in the low byte. The gear word carries the run mode in
//! the high byte and the level in the low byte.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::status::TEMPERATURE_OFFSET;

/// Highest run level.
pub const MAX_LEVEL: u16 = 18;

const TARGET_TEMP_RANGE: (i16, i16) = (0, 40);
const MOTOR_TEMP_RANGE: (i16, i16) = (40, 200);
const HYSTERESIS_MAX: u8 = 20;
const VOLTAGE_RANGE_DV: (u16, u16) = (60, 320);
const ALTITUDE_MAX_M: u16 = 6000;
const PUMP_MAX_DHZ: u16 = 100;
const FAN_MAX_RPM: u16 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fixed level.
    #[default]
    Manual,
    /// Level follows the target temperature.
    Thermostat,
}

impl RunMode {
    pub fn code(self) -> u8 {
        match self {
            RunMode::Manual => 0,
            RunMode::Thermostat => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RunMode::Manual),
            1 => Some(RunMode::Thermostat),
            _ => None,
        }
    }
}

/// First half of the configuration block (0x0010..0x0014).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLimits {
    pub low_voltage_cutoff_dv: u16,
    pub high_voltage_cutoff_dv: u16,
    pub altitude_m: u16,
    pub pump_min_dhz: u16,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            low_voltage_cutoff_dv: 105,
            high_voltage_cutoff_dv: 160,
            altitude_m: 0,
            pump_min_dhz: 16,
        }
    }
}

impl ConfigLimits {
    pub fn to_registers(&self) -> [u16; 4] {
        [
            self.low_voltage_cutoff_dv,
            self.high_voltage_cutoff_dv,
            self.altitude_m,
            self.pump_min_dhz,
        ]
    }

    pub fn from_registers(regs: &[u16; 4]) -> Self {
        Self {
            low_voltage_cutoff_dv: regs[0],
            high_voltage_cutoff_dv: regs[1],
            altitude_m: regs[2],
            pump_min_dhz: regs[3],
        }
    }
}

/// Second half of the configuration block (0x0014..0x0018).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigTuning {
    pub pump_max_dhz: u16,
    pub fan_min_rpm: u16,
    pub fan_max_rpm: u16,
    pub glow_power_pct: u16,
}

impl Default for ConfigTuning {
    fn default() -> Self {
        Self {
            pump_max_dhz: 55,
            fan_min_rpm: 1680,
            fan_max_rpm: 4500,
            glow_power_pct: 80,
        }
    }
}

impl ConfigTuning {
    pub fn to_registers(&self) -> [u16; 4] {
        [
            self.pump_max_dhz,
            self.fan_min_rpm,
            self.fan_max_rpm,
            self.glow_power_pct,
        ]
    }

    pub fn from_registers(regs: &[u16; 4]) -> Self {
        Self {
            pump_max_dhz: regs[0],
            fan_min_rpm: regs[1],
            fan_max_rpm: regs[2],
            glow_power_pct: regs[3],
        }
    }
}

/// Complete editable device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub power_on: bool,
    pub run_mode: RunMode,
    pub level: u16,
    pub target_temp_c: i16,
    pub target_hysteresis: u8,
    pub motor_temp_limit_c: i16,
    pub motor_temp_hysteresis: u8,
    pub limits: ConfigLimits,
    pub tuning: ConfigTuning,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            power_on: false,
            run_mode: RunMode::Manual,
            level: 9,
            target_temp_c: 21,
            target_hysteresis: 2,
            motor_temp_limit_c: 120,
            motor_temp_hysteresis: 10,
            limits: ConfigLimits::default(),
            tuning: ConfigTuning::default(),
        }
    }
}

impl DeviceSettings {
    /// Check every field against the range the firmware accepts.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LEVEL).contains(&self.level) {
            return Err(invalid("level", format!("must be 1..={MAX_LEVEL}")));
        }
        check_range("target_temp_c", self.target_temp_c, TARGET_TEMP_RANGE)?;
        check_range("motor_temp_limit_c", self.motor_temp_limit_c, MOTOR_TEMP_RANGE)?;
        check_hysteresis("target_hysteresis", self.target_hysteresis)?;
        check_hysteresis("motor_temp_hysteresis", self.motor_temp_hysteresis)?;

        let limits = &self.limits;
        for (field, value) in [
            ("low_voltage_cutoff_dv", limits.low_voltage_cutoff_dv),
            ("high_voltage_cutoff_dv", limits.high_voltage_cutoff_dv),
        ] {
            if !(VOLTAGE_RANGE_DV.0..=VOLTAGE_RANGE_DV.1).contains(&value) {
                return Err(invalid(
                    field,
                    format!("must be {}..={}", VOLTAGE_RANGE_DV.0, VOLTAGE_RANGE_DV.1),
                ));
            }
        }
        if limits.low_voltage_cutoff_dv >= limits.high_voltage_cutoff_dv {
            return Err(invalid(
                "low_voltage_cutoff_dv",
                "must be below high_voltage_cutoff_dv".to_string(),
            ));
        }
        if limits.altitude_m > ALTITUDE_MAX_M {
            return Err(invalid("altitude_m", format!("must be at most {ALTITUDE_MAX_M}")));
        }

        let tuning = &self.tuning;
        if limits.pump_min_dhz == 0 || tuning.pump_max_dhz > PUMP_MAX_DHZ {
            return Err(invalid("pump_dhz", format!("must be 1..={PUMP_MAX_DHZ}")));
        }
        if limits.pump_min_dhz >= tuning.pump_max_dhz {
            return Err(invalid(
                "pump_min_dhz",
                "must be below pump_max_dhz".to_string(),
            ));
        }
        if tuning.fan_max_rpm > FAN_MAX_RPM || tuning.fan_min_rpm >= tuning.fan_max_rpm {
            return Err(invalid(
                "fan_rpm",
                format!("need fan_min_rpm < fan_max_rpm <= {FAN_MAX_RPM}"),
            ));
        }
        if tuning.glow_power_pct > 100 {
            return Err(invalid("glow_power_pct", "must be at most 100".to_string()));
        }
        Ok(())
    }

    pub fn switch_word(&self) -> u16 {
        u16::from(self.power_on)
    }

    pub fn gear_word(&self) -> u16 {
        encode_gear(self.run_mode, self.level)
    }

    pub fn target_temp_word(&self) -> u16 {
        encode_temp_word(self.target_temp_c, self.target_hysteresis)
    }

    pub fn motor_temp_word(&self) -> u16 {
        encode_temp_word(self.motor_temp_limit_c, self.motor_temp_hysteresis)
    }
}

pub fn encode_gear(mode: RunMode, level: u16) -> u16 {
    (u16::from(mode.code()) << 8) | (level & 0xFF)
}

pub fn decode_gear(word: u16) -> (Option<RunMode>, u16) {
    (RunMode::from_code((word >> 8) as u8), word & 0xFF)
}

/// Caller validates the range first; out-of-range values saturate.
pub fn encode_temp_word(temp_c: i16, hysteresis: u8) -> u16 {
    let raw = (i32::from(temp_c) + TEMPERATURE_OFFSET).clamp(0, 0xFF) as u16;
    (raw << 8) | u16::from(hysteresis)
}

pub fn decode_temp_word(word: u16) -> (i16, u8) {
    let temp = i32::from(word >> 8) - TEMPERATURE_OFFSET;
    (temp as i16, (word & 0xFF) as u8)
}

fn check_range(field: &'static str, value: i16, (lo, hi): (i16, i16)) -> Result<()> {
    if (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("must be {lo}..={hi}")))
    }
}

fn check_hysteresis(field: &'static str, value: u8) -> Result<()> {
    if (1..=HYSTERESIS_MAX).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("must be 1..={HYSTERESIS_MAX}")))
    }
}

fn invalid(field: &'static str, message: String) -> ProtocolError {
    ProtocolError::InvalidSetting { field, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DeviceSettings::default().validate().unwrap();
    }

    #[test]
    fn packed_words() {
        let settings = DeviceSettings {
            run_mode: RunMode::Thermostat,
            level: 12,
            target_temp_c: 21,
            target_hysteresis: 2,
            ..DeviceSettings::default()
        };
        assert_eq!(settings.gear_word(), 0x010C);
        assert_eq!(settings.target_temp_word(), (76 << 8) | 2);
        assert_eq!(decode_gear(0x010C), (Some(RunMode::Thermostat), 12));
        assert_eq!(decode_temp_word(settings.target_temp_word()), (21, 2));
        assert_eq!(decode_gear(0x0705).0, None);
    }

    #[test]
    fn switch_word_tracks_power() {
        let mut settings = DeviceSettings::default();
        assert_eq!(settings.switch_word(), 0);
        settings.power_on = true;
        assert_eq!(settings.switch_word(), 1);
    }

    #[test]
    fn out_of_range_fields_are_named() {
        let cases: Vec<(DeviceSettings, &str)> = vec![
            (
                DeviceSettings {
                    level: 0,
                    ..DeviceSettings::default()
                },
                "level",
            ),
            (
                DeviceSettings {
                    target_temp_c: 60,
                    ..DeviceSettings::default()
                },
                "target_temp_c",
            ),
            (
                DeviceSettings {
                    motor_temp_hysteresis: 0,
                    ..DeviceSettings::default()
                },
                "motor_temp_hysteresis",
            ),
            (
                DeviceSettings {
                    limits: ConfigLimits {
                        low_voltage_cutoff_dv: 200,
                        high_voltage_cutoff_dv: 150,
                        ..ConfigLimits::default()
                    },
                    ..DeviceSettings::default()
                },
                "low_voltage_cutoff_dv",
            ),
            (
                DeviceSettings {
                    tuning: ConfigTuning {
                        glow_power_pct: 101,
                        ..ConfigTuning::default()
                    },
                    ..DeviceSettings::default()
                },
                "glow_power_pct",
            ),
        ];

        for (settings, expected) in cases {
            match settings.validate() {
                Err(ProtocolError::InvalidSetting { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: DeviceSettings =
            serde_json::from_str(r#"{"power_on": true, "run_mode": "thermostat", "limits": {"altitude_m": 900}}"#)
                .unwrap();
        assert!(settings.power_on);
        assert_eq!(settings.run_mode, RunMode::Thermostat);
        assert_eq!(settings.limits.altitude_m, 900);
        assert_eq!(settings.limits.low_voltage_cutoff_dv, 105);
        assert_eq!(settings.tuning, ConfigTuning::default());
    }

    #[test]
    fn config_halves_round_trip_through_registers() {
        let limits = ConfigLimits::default();
        assert_eq!(ConfigLimits::from_registers(&limits.to_registers()), limits);
        let tuning = ConfigTuning::default();
        assert_eq!(ConfigTuning::from_registers(&tuning.to_registers()), tuning);
    }
}
