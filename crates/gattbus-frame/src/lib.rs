//! Modbus-RTU frame codec for notification-based links.
//!
//! This is the lowest layer of gattbus. Every frame on the wire is:
//! - a slave address byte
//! - a function code byte
//! - a function-specific body
//! - a CRC-16/Modbus checksum, low byte first
//!
//! Notifications carry whole frames, so there is no stream reassembly here:
//! callers hand in a complete notification and get a verdict back.

pub mod codec;
pub mod error;
pub mod function;
pub mod hex;

pub use codec::{
    append_crc, build_read_request, build_write_multiple_registers,
    build_write_single_register, crc16, is_valid, parse_registers, verify, CRC_SIZE, MAX_WRITE_REGISTERS,
    MIN_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use function::{
    function_name, is_read, is_write, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS,
    WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER,
};
pub use hex::{parse_hex, to_hex};
