//! Modbus-RTU over a BLE GATT write/notify link.
//!
//! gattbus keeps one polling session with a heater-class device alive over
//! an unreliable radio link, mirrors its configuration, and applies
//! read-back-verified writes.
//!
//! # Crate Structure
//!
//! - [`frame`]: CRC-16/Modbus and request/response frame codec
//! - [`protocol`]: register groups, frame classification, telemetry decoding,
//!   configuration mirror and write transactions
//! - [`link`]: async wrapper over a callback-driven GATT backend
//! - [`session`]: reconnecting session controller and device simulator
//!   (behind `session` feature)

/// Re-export frame codec types.
pub mod frame {
    pub use gattbus_frame::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use gattbus_protocol::*;
}

/// Re-export link types.
pub mod link {
    pub use gattbus_link::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use gattbus_session::*;
}
