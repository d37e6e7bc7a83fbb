//! Read-back-verified register writes.
//!
//! A transaction is sent, acknowledged, then confirmed by re-reading its
//! read-back group. Only a passing [`WriteTransaction::verify`] may be
//! committed to the mirror.

use bytes::Bytes;
use gattbus_frame::{
    build_write_multiple_registers, build_write_single_register, WRITE_MULTIPLE_REGISTERS,
};

use crate::error::Result;
use crate::frame::{single_write_ack, ExpectedAck};
use crate::group::{
    GroupId, CONFIG_BLOCK_ADDRESS, CONFIG_TUNING_ADDRESS, GEAR_ADDRESS, MOTOR_TEMP_ADDRESS,
    SLAVE_ADDRESS, SWITCH_ADDRESS, TARGET_TEMP_ADDRESS,
};
use crate::mirror::{update_mirror, ProtocolMirror};
use crate::settings::{encode_gear, DeviceSettings, RunMode, MAX_LEVEL};
use crate::ProtocolError;

/// Registers a transaction writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub start: u16,
    pub values: Vec<u16>,
}

/// Where in the read-back block the written values must reappear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadbackCheck {
    pub offset: usize,
    pub expected: Vec<u16>,
}

impl ReadbackCheck {
    pub fn check(&self, registers: &[u16]) -> bool {
        registers
            .get(self.offset..self.offset + self.expected.len())
            .is_some_and(|window| window == self.expected.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTransaction {
    pub title: &'static str,
    pub request: Bytes,
    pub expected_ack: ExpectedAck,
    pub readback: GroupId,
    pub check: ReadbackCheck,
    pub target: WriteTarget,
}

impl WriteTransaction {
    fn single(title: &'static str, readback: GroupId, address: u16, value: u16) -> Self {
        let group = readback.descriptor();
        Self {
            title,
            request: build_write_single_register(SLAVE_ADDRESS, address, value),
            expected_ack: single_write_ack(address, value),
            readback,
            check: ReadbackCheck {
                offset: usize::from(address - group.start_address),
                expected: vec![value],
            },
            target: WriteTarget {
                start: address,
                values: vec![value],
            },
        }
    }

    fn config(title: &'static str, start: u16, values: [u16; 4]) -> Result<Self> {
        Ok(Self {
            title,
            request: build_write_multiple_registers(SLAVE_ADDRESS, start, &values)?,
            expected_ack: ExpectedAck {
                function: WRITE_MULTIPLE_REGISTERS,
                address: start,
                value_or_quantity: values.len() as u16,
            },
            readback: GroupId::ConfigBlock,
            check: ReadbackCheck {
                offset: usize::from(start - CONFIG_BLOCK_ADDRESS),
                expected: values.to_vec(),
            },
            target: WriteTarget {
                start,
                values: values.to_vec(),
            },
        })
    }

    /// Whether the read-back registers confirm the write.
    pub fn verify(&self, registers: &[u16]) -> bool {
        self.check.check(registers)
    }

    /// Mirror after a verified write: only the targeted registers change.
    ///
    /// An unobserved config block is seeded from `readback` so a config
    /// write can land on it.
    pub fn commit(&self, mirror: &ProtocolMirror, readback: &[u16]) -> ProtocolMirror {
        let base = if self.readback == GroupId::ConfigBlock && mirror.config_block.is_none() {
            update_mirror(mirror, GroupId::ConfigBlock, readback)
        } else {
            mirror.clone()
        };
        base.apply_registers(self.target.start, &self.target.values)
    }
}

/// The six transactions that apply `settings`, in execution order.
pub fn build_write_transactions(settings: &DeviceSettings) -> Result<Vec<WriteTransaction>> {
    settings.validate()?;
    Ok(vec![
        WriteTransaction::single(
            "power switch",
            GroupId::Switch,
            SWITCH_ADDRESS,
            settings.switch_word(),
        ),
        WriteTransaction::single(
            "run mode and level",
            GroupId::Gear,
            GEAR_ADDRESS,
            settings.gear_word(),
        ),
        WriteTransaction::single(
            "target temperature",
            GroupId::TargetTempWord,
            TARGET_TEMP_ADDRESS,
            settings.target_temp_word(),
        ),
        WriteTransaction::single(
            "motor temperature limit",
            GroupId::MotorTempWord,
            MOTOR_TEMP_ADDRESS,
            settings.motor_temp_word(),
        ),
        WriteTransaction::config(
            "config limits",
            CONFIG_BLOCK_ADDRESS,
            settings.limits.to_registers(),
        )?,
        WriteTransaction::config(
            "config tuning",
            CONFIG_TUNING_ADDRESS,
            settings.tuning.to_registers(),
        )?,
    ])
}

pub fn power_transaction(on: bool) -> WriteTransaction {
    WriteTransaction::single("power switch", GroupId::Switch, SWITCH_ADDRESS, u16::from(on))
}

pub fn run_mode_transaction(mode: RunMode, level: u16) -> Result<WriteTransaction> {
    if !(1..=MAX_LEVEL).contains(&level) {
        return Err(ProtocolError::InvalidSetting {
            field: "level",
            message: format!("must be 1..={MAX_LEVEL}"),
        });
    }
    Ok(WriteTransaction::single(
        "run mode and level",
        GroupId::Gear,
        GEAR_ADDRESS,
        encode_gear(mode, level),
    ))
}
