use crate::device::DeviceHandle;
use crate::error::Result;
use crate::link::GattEvents;

/// Status code reported by backends for a successful operation.
pub const GATT_SUCCESS: u8 = 0;

/// Platform GATT client for one device.
///
/// Every lifecycle method only *starts* an operation. Completion is reported
/// later through the [`GattEvents`] handle given to [`BackendFactory::create`],
/// possibly from another thread and possibly before the method returns.
/// Implementations must not block.
pub trait GattBackend: Send + Sync {
    /// Begin connecting. Completes via `GattEvents::on_connection_state`.
    fn connect(&self) -> Result<()>;

    /// Begin service discovery. Completes via `GattEvents::on_services_discovered`.
    fn discover_services(&self) -> Result<()>;

    /// Request a link budget (ATT MTU). Completes via `GattEvents::on_mtu_changed`.
    fn request_mtu(&self, mtu: u16) -> Result<()>;

    /// Write the notify characteristic's client configuration descriptor.
    /// Completes via `GattEvents::on_notify_state`.
    fn set_notify(&self, enabled: bool) -> Result<()>;

    /// Write a command without response. No completion is reported.
    fn write_command(&self, frame: &[u8]) -> Result<()>;

    /// Request a link-level disconnect. Completes via a disconnected state.
    fn disconnect(&self);

    /// Release platform resources. No further callbacks are expected.
    fn close(&self);
}

/// Creates a fresh backend for each connection attempt.
pub trait BackendFactory: Send + Sync {
    /// Create a backend bound to `device` that reports into `events`.
    fn create(&self, device: &DeviceHandle, events: GattEvents) -> Result<Box<dyn GattBackend>>;
}
