//! GATT write/notify link abstraction.
//!
//! Wraps a callback-driven platform client ([`GattBackend`]) in an async
//! [`GattLink`]:
//! - connect, service discovery, link-budget negotiation and notification
//!   enablement are single-resolution operations raced against a timeout
//! - outbound frames are written without response
//! - inbound notifications land on an unbounded FIFO queue with one consumer
//! - unexpected drops are published as [`LinkEvent`]s
//!
//! Everything above this layer builds on [`GattLink`].

pub mod device;
pub mod error;
pub mod link;
mod pending;
pub mod traits;

pub use device::DeviceHandle;
pub use error::{LinkError, Result};
pub use link::{ConnectionState, GattEvents, GattLink, LinkEvent};
pub use traits::{BackendFactory, GattBackend, GATT_SUCCESS};
