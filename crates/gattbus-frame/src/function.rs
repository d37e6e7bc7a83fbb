//! Supported Modbus function codes.
//!
//! Only the four register functions are spoken on the link. Everything else,
//! including exception responses (high bit set), is unsupported.

/// Read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read input registers.
pub const READ_INPUT_REGISTERS: u8 = 0x04;

/// Write a single holding register.
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write a contiguous run of holding registers.
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Returns a human-readable name for a function code.
pub fn function_name(code: u8) -> &'static str {
    match code {
        READ_HOLDING_REGISTERS => "READ_HOLDING",
        READ_INPUT_REGISTERS => "READ_INPUT",
        WRITE_SINGLE_REGISTER => "WRITE_SINGLE",
        WRITE_MULTIPLE_REGISTERS => "WRITE_MULTIPLE",
        0x80..=0xFF => "EXCEPTION",
        _ => "UNSUPPORTED",
    }
}

/// Returns true for the register read functions.
pub fn is_read(code: u8) -> bool {
    matches!(code, READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS)
}

/// Returns true for the register write functions.
pub fn is_write(code: u8) -> bool {
    matches!(code, WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_REGISTERS)
}
