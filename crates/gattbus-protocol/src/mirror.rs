use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::group::{
    GroupId, CONFIG_BLOCK_ADDRESS, CONFIG_BLOCK_LEN, GEAR_ADDRESS, MOTOR_TEMP_ADDRESS,
    SWITCH_ADDRESS, TARGET_TEMP_ADDRESS,
};
use crate::settings::{
    decode_gear, decode_temp_word, ConfigLimits, ConfigTuning, DeviceSettings, RunMode,
};

/// Raw register values observed from the configuration groups.
///
/// A field stays `None` until its group has been read once. Values are only
/// ever replaced wholesale, never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolMirror {
    pub config_block: Option<Vec<u16>>,
    pub switch: Option<u16>,
    pub gear: Option<u16>,
    pub motor_temp_word: Option<u16>,
    pub target_temp_word: Option<u16>,
}

/// Merge one group's registers into `current`.
///
/// Groups that do not feed the mirror, and register blocks of the wrong
/// length, leave it unchanged.
pub fn update_mirror(current: &ProtocolMirror, group: GroupId, registers: &[u16]) -> ProtocolMirror {
    let mut next = current.clone();
    let single = || match registers {
        [value] => Some(*value),
        _ => None,
    };
    match group {
        GroupId::ConfigBlock if registers.len() == usize::from(CONFIG_BLOCK_LEN) => {
            next.config_block = Some(registers.to_vec());
        }
        GroupId::Switch => next.switch = single().or(next.switch),
        GroupId::Gear => next.gear = single().or(next.gear),
        GroupId::MotorTempWord => next.motor_temp_word = single().or(next.motor_temp_word),
        GroupId::TargetTempWord => next.target_temp_word = single().or(next.target_temp_word),
        _ => {}
    }
    next
}

impl ProtocolMirror {
    /// All five pieces have been observed at least once.
    pub fn is_hydratable(&self) -> bool {
        self.missing().is_none()
    }

    fn missing(&self) -> Option<&'static str> {
        if self.config_block.is_none() {
            Some("config_block")
        } else if self.switch.is_none() {
            Some("switch")
        } else if self.gear.is_none() {
            Some("gear")
        } else if self.motor_temp_word.is_none() {
            Some("motor_temp_word")
        } else if self.target_temp_word.is_none() {
            Some("target_temp_word")
        } else {
            None
        }
    }

    /// Overwrite the registers a write targeted, leaving everything else.
    ///
    /// Writes into an unobserved config block are dropped; callers seed the
    /// block from the read-back first.
    pub fn apply_registers(&self, start: u16, values: &[u16]) -> ProtocolMirror {
        let mut next = self.clone();
        for (address, value) in (start..).zip(values.iter().copied()) {
            match address {
                SWITCH_ADDRESS => next.switch = Some(value),
                GEAR_ADDRESS => next.gear = Some(value),
                MOTOR_TEMP_ADDRESS => next.motor_temp_word = Some(value),
                TARGET_TEMP_ADDRESS => next.target_temp_word = Some(value),
                a if (CONFIG_BLOCK_ADDRESS..CONFIG_BLOCK_ADDRESS + CONFIG_BLOCK_LEN).contains(&a) => {
                    if let Some(block) = next.config_block.as_mut() {
                        block[usize::from(a - CONFIG_BLOCK_ADDRESS)] = value;
                    }
                }
                _ => {}
            }
        }
        next
    }

    /// Rebuild editable settings from a hydrated mirror.
    pub fn to_settings(&self) -> Result<DeviceSettings> {
        if let Some(piece) = self.missing() {
            return Err(ProtocolError::MirrorIncomplete(piece));
        }
        let block = self.config_block.as_deref().unwrap_or_default();
        if block.len() != usize::from(CONFIG_BLOCK_LEN) {
            return Err(ProtocolError::MirrorIncomplete("config_block"));
        }
        let (mode, level) = decode_gear(self.gear.unwrap_or_default());
        let (target_temp_c, target_hysteresis) =
            decode_temp_word(self.target_temp_word.unwrap_or_default());
        let (motor_temp_limit_c, motor_temp_hysteresis) =
            decode_temp_word(self.motor_temp_word.unwrap_or_default());

        let mut limits = [0u16; 4];
        limits.copy_from_slice(&block[..4]);
        let mut tuning = [0u16; 4];
        tuning.copy_from_slice(&block[4..8]);

        Ok(DeviceSettings {
            power_on: self.switch.unwrap_or_default() != 0,
            run_mode: mode.unwrap_or(RunMode::Manual),
            level,
            target_temp_c,
            target_hysteresis,
            motor_temp_limit_c,
            motor_temp_hysteresis,
            limits: ConfigLimits::from_registers(&limits),
            tuning: ConfigTuning::from_registers(&tuning),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hydrated(settings: &DeviceSettings) -> ProtocolMirror {
        let mut block = settings.limits.to_registers().to_vec();
        block.extend(settings.tuning.to_registers());
        let mut mirror = ProtocolMirror::default();
        mirror = update_mirror(&mirror, GroupId::ConfigBlock, &block);
        mirror = update_mirror(&mirror, GroupId::Switch, &[settings.switch_word()]);
        mirror = update_mirror(&mirror, GroupId::Gear, &[settings.gear_word()]);
        mirror = update_mirror(&mirror, GroupId::MotorTempWord, &[settings.motor_temp_word()]);
        update_mirror(&mirror, GroupId::TargetTempWord, &[settings.target_temp_word()])
    }

    #[test]
    fn hydratable_only_after_all_five() {
        let mut mirror = ProtocolMirror::default();
        let steps: [(GroupId, Vec<u16>); 5] = [
            (GroupId::ConfigBlock, vec![0; 8]),
            (GroupId::Switch, vec![1]),
            (GroupId::Gear, vec![5]),
            (GroupId::MotorTempWord, vec![7]),
            (GroupId::TargetTempWord, vec![9]),
        ];
        for (group, regs) in steps {
            assert!(!mirror.is_hydratable());
            mirror = update_mirror(&mirror, group, &regs);
        }
        assert!(mirror.is_hydratable());
    }

    #[test]
    fn update_leaves_other_fields_alone() {
        let base = update_mirror(&ProtocolMirror::default(), GroupId::Switch, &[1]);
        let next = update_mirror(&base, GroupId::Gear, &[0x0103]);
        assert_eq!(next.switch, Some(1));
        assert_eq!(next.gear, Some(0x0103));
        assert_eq!(base.gear, None);
    }

    #[test]
    fn status_and_info_groups_do_not_touch_mirror() {
        let base = update_mirror(&ProtocolMirror::default(), GroupId::Switch, &[1]);
        assert_eq!(update_mirror(&base, GroupId::Status, &[0; 11]), base);
        assert_eq!(update_mirror(&base, GroupId::DeviceInfo, &[1, 2, 3, 4]), base);
    }

    #[test]
    fn wrong_length_is_ignored() {
        let base = ProtocolMirror::default();
        assert_eq!(update_mirror(&base, GroupId::ConfigBlock, &[1, 2]), base);
        assert_eq!(update_mirror(&base, GroupId::Switch, &[1, 2]), base);
    }

    #[test]
    fn settings_round_trip_through_mirror() {
        let settings = DeviceSettings {
            power_on: true,
            run_mode: RunMode::Thermostat,
            level: 14,
            target_temp_c: 19,
            ..DeviceSettings::default()
        };
        assert_eq!(hydrated(&settings).to_settings().unwrap(), settings);
    }

    #[test]
    fn partial_mirror_has_no_settings() {
        let mirror = update_mirror(&ProtocolMirror::default(), GroupId::ConfigBlock, &[0; 8]);
        assert_eq!(
            mirror.to_settings().unwrap_err(),
            ProtocolError::MirrorIncomplete("switch")
        );
    }

    #[test]
    fn apply_registers_targets_exact_slots() {
        let mirror = hydrated(&DeviceSettings::default());
        let next = mirror.apply_registers(CONFIG_BLOCK_ADDRESS + 4, &[60, 1700, 4600, 90]);
        let block = next.config_block.clone().unwrap();
        assert_eq!(&block[..4], &mirror.config_block.as_ref().unwrap()[..4]);
        assert_eq!(&block[4..], &[60, 1700, 4600, 90]);
        assert_eq!(next.switch, mirror.switch);
    }
}
