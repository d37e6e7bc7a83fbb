//! Fixed register-group table.
//!
//! The table order is the polling priority order.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use gattbus_frame::{build_read_request, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS};
use serde::Serialize;

/// Modbus slave address of the device.
pub const SLAVE_ADDRESS: u8 = 0x01;

/// First register of the configuration block.
pub const CONFIG_BLOCK_ADDRESS: u16 = 0x0010;
/// Number of registers in the configuration block.
pub const CONFIG_BLOCK_LEN: u16 = 8;
/// First register of the tuning half of the configuration block.
pub const CONFIG_TUNING_ADDRESS: u16 = CONFIG_BLOCK_ADDRESS + 4;
/// Power switch register.
pub const SWITCH_ADDRESS: u16 = 0x0020;
/// Run mode / level register.
pub const GEAR_ADDRESS: u16 = 0x0021;
/// Motor temperature limit packed word.
pub const MOTOR_TEMP_ADDRESS: u16 = 0x0022;
/// Target temperature packed word.
pub const TARGET_TEMP_ADDRESS: u16 = 0x0023;

/// Identifies one of the seven register groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    Status,
    ConfigBlock,
    Switch,
    Gear,
    MotorTempWord,
    TargetTempWord,
    DeviceInfo,
}

impl GroupId {
    /// All groups in polling priority order.
    pub const ALL: [GroupId; 7] = [
        GroupId::Status,
        GroupId::ConfigBlock,
        GroupId::Switch,
        GroupId::Gear,
        GroupId::MotorTempWord,
        GroupId::TargetTempWord,
        GroupId::DeviceInfo,
    ];

    /// The group's descriptor.
    pub fn descriptor(self) -> &'static ReadGroup {
        &GROUPS[self as usize]
    }

    /// Short stable name used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            GroupId::Status => "status",
            GroupId::ConfigBlock => "config_block",
            GroupId::Switch => "switch",
            GroupId::Gear => "gear",
            GroupId::MotorTempWord => "motor_temp_word",
            GroupId::TargetTempWord => "target_temp_word",
            GroupId::DeviceInfo => "device_info",
        }
    }

    /// The four single-register groups that the desync flag suppresses.
    pub fn is_single_register(self) -> bool {
        matches!(
            self,
            GroupId::Switch | GroupId::Gear | GroupId::MotorTempWord | GroupId::TargetTempWord
        )
    }

    /// Only the slow group may fail during the initial read round.
    pub fn is_optional(self) -> bool {
        self == GroupId::DeviceInfo
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable descriptor of a register group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadGroup {
    pub id: GroupId,
    pub function_code: u8,
    pub start_address: u16,
    pub quantity: u16,
    /// Polling period in normal operation.
    pub nominal_period: Duration,
    /// Polling period while a write holds the transport.
    pub degraded_period: Duration,
}

impl ReadGroup {
    /// Build the read request for this group.
    pub fn request(&self) -> Bytes {
        build_read_request(
            SLAVE_ADDRESS,
            self.function_code,
            self.start_address,
            self.quantity,
        )
    }

    /// The cadence to use in the given mode.
    pub fn period(&self, degraded: bool) -> Duration {
        if degraded {
            self.degraded_period
        } else {
            self.nominal_period
        }
    }

    /// Whether `address` falls inside this group.
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start_address
            && u32::from(address) < u32::from(self.start_address) + u32::from(self.quantity)
    }
}

/// The fixed group table, indexed by `GroupId as usize`.
pub const GROUPS: [ReadGroup; 7] = [
    ReadGroup {
        id: GroupId::Status,
        function_code: READ_INPUT_REGISTERS,
        start_address: 0x0000,
        quantity: 11,
        nominal_period: Duration::from_millis(500),
        degraded_period: Duration::from_millis(1500),
    },
    ReadGroup {
        id: GroupId::ConfigBlock,
        function_code: READ_HOLDING_REGISTERS,
        start_address: CONFIG_BLOCK_ADDRESS,
        quantity: CONFIG_BLOCK_LEN,
        nominal_period: Duration::from_secs(5),
        degraded_period: Duration::from_secs(15),
    },
    ReadGroup {
        id: GroupId::Switch,
        function_code: READ_HOLDING_REGISTERS,
        start_address: SWITCH_ADDRESS,
        quantity: 1,
        nominal_period: Duration::from_secs(2),
        degraded_period: Duration::from_secs(6),
    },
    ReadGroup {
        id: GroupId::Gear,
        function_code: READ_HOLDING_REGISTERS,
        start_address: GEAR_ADDRESS,
        quantity: 1,
        nominal_period: Duration::from_secs(2),
        degraded_period: Duration::from_secs(6),
    },
    ReadGroup {
        id: GroupId::MotorTempWord,
        function_code: READ_HOLDING_REGISTERS,
        start_address: MOTOR_TEMP_ADDRESS,
        quantity: 1,
        nominal_period: Duration::from_secs(2),
        degraded_period: Duration::from_secs(6),
    },
    ReadGroup {
        id: GroupId::TargetTempWord,
        function_code: READ_HOLDING_REGISTERS,
        start_address: TARGET_TEMP_ADDRESS,
        quantity: 1,
        nominal_period: Duration::from_secs(2),
        degraded_period: Duration::from_secs(6),
    },
    ReadGroup {
        id: GroupId::DeviceInfo,
        function_code: READ_INPUT_REGISTERS,
        start_address: 0x0030,
        quantity: 4,
        nominal_period: Duration::from_secs(30),
        degraded_period: Duration::from_secs(60),
    },
];
