//! Device protocol definition on top of the Modbus frame codec.
//!
//! Declares the fixed register groups and their cadences, classifies inbound
//! frames, decodes telemetry, accumulates the configuration mirror, and
//! builds read-back-verified write transactions.
//!
//! Nothing in this crate performs I/O or holds session state.

pub mod error;
pub mod frame;
pub mod group;
pub mod mirror;
pub mod settings;
pub mod status;
pub mod transaction;

pub use error::{ProtocolError, Result};
pub use frame::{parse_frame, ExpectedAck, InvalidReason, ParsedFrame};
pub use group::{GroupId, ReadGroup, GROUPS, SLAVE_ADDRESS};
pub use mirror::{update_mirror, ProtocolMirror};
pub use settings::{ConfigLimits, ConfigTuning, DeviceSettings, RunMode, MAX_LEVEL};
pub use status::{decode_status, DeviceStatusSnapshot, RunState, STATUS_REGISTER_COUNT};
pub use transaction::{
    build_write_transactions, power_transaction, run_mode_transaction, ReadbackCheck,
    WriteTarget, WriteTransaction,
};
