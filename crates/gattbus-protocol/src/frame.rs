//! Classification of inbound notifications into reads, acks and invalid frames.

use std::fmt;

use bytes::Bytes;
use gattbus_frame::{
    is_read, is_valid, is_write, parse_registers, CRC_SIZE, MIN_FRAME_SIZE,
    WRITE_SINGLE_REGISTER,
};

/// Size of a write acknowledgement: slave, function, address, value, CRC.
const ACK_FRAME_SIZE: usize = 8;
/// Read response header: slave, function, byte count.
const READ_HEADER_SIZE: usize = 3;

/// Why a frame was classified as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    TooShort,
    ChecksumFailed,
    BadReadLength,
    BadAckLength,
    UnsupportedFunction,
}

impl InvalidReason {
    /// True when the frame failed checksum or length validation.
    ///
    /// An unsupported function code (an exception reply, for instance)
    /// arrived intact and is not a sign of a corrupted link.
    pub fn is_malformed(self) -> bool {
        !matches!(self, InvalidReason::UnsupportedFunction)
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvalidReason::TooShort => "frame too short",
            InvalidReason::ChecksumFailed => "checksum failed",
            InvalidReason::BadReadLength => "bad read length",
            InvalidReason::BadAckLength => "bad ack length",
            InvalidReason::UnsupportedFunction => "unsupported function code",
        })
    }
}

/// The acknowledgement a write request expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedAck {
    pub function: u8,
    pub address: u16,
    /// Register value for 0x06, register count for 0x10.
    pub value_or_quantity: u16,
}

/// Classification of one inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    ReadResponse {
        function_code: u8,
        registers: Vec<u16>,
        raw: Bytes,
    },
    WriteAck {
        function_code: u8,
        address: u16,
        value_or_quantity: u16,
        raw: Bytes,
    },
    Invalid {
        reason: InvalidReason,
        raw: Bytes,
    },
}

impl ParsedFrame {
    /// The bytes this frame was parsed from.
    pub fn raw(&self) -> &Bytes {
        match self {
            ParsedFrame::ReadResponse { raw, .. }
            | ParsedFrame::WriteAck { raw, .. }
            | ParsedFrame::Invalid { raw, .. } => raw,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ParsedFrame::Invalid { .. })
    }

    /// Invalid because of checksum or length, as opposed to an intact frame
    /// carrying an unsupported function code.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ParsedFrame::Invalid { reason, .. } if reason.is_malformed())
    }

    /// Whether this is the response to a read of `quantity` registers via `function`.
    pub fn matches_read(&self, function: u8, quantity: u16) -> bool {
        match self {
            ParsedFrame::ReadResponse {
                function_code,
                registers,
                ..
            } => *function_code == function && registers.len() == usize::from(quantity),
            _ => false,
        }
    }

    /// Whether this is exactly the acknowledgement `expected` describes.
    pub fn matches_ack(&self, expected: &ExpectedAck) -> bool {
        match self {
            ParsedFrame::WriteAck {
                function_code,
                address,
                value_or_quantity,
                ..
            } => {
                *function_code == expected.function
                    && *address == expected.address
                    && *value_or_quantity == expected.value_or_quantity
            }
            _ => false,
        }
    }
}

/// Classify a notification. Never fails: anything unrecognised is `Invalid`.
pub fn parse_frame(frame: &[u8]) -> ParsedFrame {
    let raw = Bytes::copy_from_slice(frame);
    let invalid = |reason| ParsedFrame::Invalid {
        reason,
        raw: raw.clone(),
    };

    if frame.len() < MIN_FRAME_SIZE {
        return invalid(InvalidReason::TooShort);
    }
    if !is_valid(frame) {
        return invalid(InvalidReason::ChecksumFailed);
    }

    let function_code = frame[1];
    if is_read(function_code) {
        let byte_count = usize::from(frame[2]);
        if byte_count % 2 != 0 || frame.len() != READ_HEADER_SIZE + byte_count + CRC_SIZE {
            return invalid(InvalidReason::BadReadLength);
        }
        return match parse_registers(frame, READ_HEADER_SIZE, byte_count) {
            Ok(registers) => ParsedFrame::ReadResponse {
                function_code,
                registers,
                raw,
            },
            Err(_) => invalid(InvalidReason::BadReadLength),
        };
    }

    if is_write(function_code) {
        if frame.len() != ACK_FRAME_SIZE {
            return invalid(InvalidReason::BadAckLength);
        }
        return ParsedFrame::WriteAck {
            function_code,
            address: u16::from_be_bytes([frame[2], frame[3]]),
            value_or_quantity: u16::from_be_bytes([frame[4], frame[5]]),
            raw,
        };
    }

    invalid(InvalidReason::UnsupportedFunction)
}

/// Expected acknowledgement for a single-register write.
pub fn single_write_ack(address: u16, value: u16) -> ExpectedAck {
    ExpectedAck {
        function: WRITE_SINGLE_REGISTER,
        address,
        value_or_quantity: value,
    }
}
