use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, warn};

use crate::device::DeviceHandle;
use crate::error::{LinkError, Result};
use crate::pending::PendingSlot;
use crate::traits::{BackendFactory, GattBackend, GATT_SUCCESS};

const EVENT_CAPACITY: usize = 16;

/// Connection state reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected { status: u8 },
}

/// Asynchronous link events not tied to a caller's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link went down without a caller-initiated disconnect.
    Dropped { status: u8 },
}

struct LinkShared {
    connect: PendingSlot<()>,
    discover: PendingSlot<()>,
    mtu: PendingSlot<u16>,
    notify: PendingSlot<bool>,
    connected: AtomicBool,
    disconnect_requested: AtomicBool,
    closed: AtomicBool,
    disconnected: Notify,
    inbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkShared {
    fn fail_pending(&self, err: &LinkError) {
        self.connect.resolve(Err(err.clone()));
        self.discover.resolve(Err(err.clone()));
        self.mtu.resolve(Err(err.clone()));
        self.notify.resolve(Err(err.clone()));
    }
}

/// Callback sink handed to a [`GattBackend`].
///
/// Cheap to clone; every method may be called from any thread.
#[derive(Clone)]
pub struct GattEvents {
    shared: Arc<LinkShared>,
}

impl GattEvents {
    /// Report a connection state change.
    pub fn on_connection_state(&self, state: ConnectionState) {
        let shared = &self.shared;
        match state {
            ConnectionState::Connected => {
                shared.connected.store(true, Ordering::SeqCst);
                if !shared.connect.resolve(Ok(())) {
                    debug!("connected callback without pending connect");
                }
            }
            ConnectionState::Disconnected { status } => {
                let was_connected = shared.connected.swap(false, Ordering::SeqCst);
                shared.fail_pending(&LinkError::Unavailable(format!(
                    "link went down (status {status})"
                )));

                if shared.disconnect_requested.load(Ordering::SeqCst) {
                    debug!(status, "requested disconnect completed");
                    shared.disconnected.notify_one();
                } else if was_connected && !shared.closed.load(Ordering::SeqCst) {
                    warn!(status, "link dropped unexpectedly");
                    let _ = shared.events.send(LinkEvent::Dropped { status });
                }
            }
        }
    }

    /// Report service discovery completion.
    pub fn on_services_discovered(&self, status: u8, characteristics_found: bool) {
        let result = if status != GATT_SUCCESS {
            Err(LinkError::Backend {
                op: "discover services",
                status,
            })
        } else if !characteristics_found {
            Err(LinkError::Unavailable(
                "write/notify characteristics not found".to_string(),
            ))
        } else {
            Ok(())
        };
        self.shared.discover.resolve(result);
    }

    /// Report the negotiated link budget.
    pub fn on_mtu_changed(&self, mtu: u16, status: u8) {
        let result = if status == GATT_SUCCESS {
            Ok(mtu)
        } else {
            Err(LinkError::Backend {
                op: "negotiate link budget",
                status,
            })
        };
        self.shared.mtu.resolve(result);
    }

    /// Report the outcome of a notification enable/disable request.
    pub fn on_notify_state(&self, enabled: bool, status: u8) {
        let result = if status == GATT_SUCCESS {
            Ok(enabled)
        } else {
            Err(LinkError::Backend {
                op: "set notifications",
                status,
            })
        };
        self.shared.notify.resolve(result);
    }

    /// Deliver an inbound notification payload.
    pub fn on_notification(&self, value: &[u8]) {
        let inbound = self
            .shared
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = inbound.as_ref() {
            let _ = tx.send(Bytes::copy_from_slice(value));
        }
    }
}

/// An async GATT write/notify link to one device.
///
/// Lifecycle operations are bounded by caller-supplied timeouts. Sending is
/// fire-and-forget; responses arrive on the inbound notification queue,
/// which has exactly one consumer.
pub struct GattLink {
    device: DeviceHandle,
    backend: Box<dyn GattBackend>,
    shared: Arc<LinkShared>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl GattLink {
    /// Create a fresh backend for `device`. Nothing is sent until [`connect`](Self::connect).
    pub fn open(factory: &dyn BackendFactory, device: &DeviceHandle) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(LinkShared {
            connect: PendingSlot::new("connect"),
            discover: PendingSlot::new("discover services"),
            mtu: PendingSlot::new("negotiate link budget"),
            notify: PendingSlot::new("set notifications"),
            connected: AtomicBool::new(false),
            disconnect_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            disconnected: Notify::new(),
            inbound: Mutex::new(Some(tx)),
            events,
        });
        let backend = factory.create(
            device,
            GattEvents {
                shared: shared.clone(),
            },
        )?;

        Ok(Self {
            device: device.clone(),
            backend,
            shared,
            inbound: tokio::sync::Mutex::new(rx),
        })
    }

    /// The device this link talks to.
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Whether the backend currently reports a live connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to unexpected link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Connect to the device.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let rx = self.shared.connect.install()?;
        if let Err(err) = self.backend.connect() {
            self.shared.connect.clear();
            return Err(err);
        }
        self.shared.connect.wait(rx, timeout).await?;
        info!(device = %self.device, "link connected");
        Ok(())
    }

    /// Discover the write/notify characteristic pair.
    pub async fn discover_services(&self, timeout: Duration) -> Result<()> {
        self.ensure_connected()?;
        let rx = self.shared.discover.install()?;
        if let Err(err) = self.backend.discover_services() {
            self.shared.discover.clear();
            return Err(err);
        }
        self.shared.discover.wait(rx, timeout).await
    }

    /// Request a link budget and return what the peer actually granted.
    pub async fn negotiate_link_budget(&self, mtu: u16, timeout: Duration) -> Result<u16> {
        self.ensure_connected()?;
        let rx = self.shared.mtu.install()?;
        if let Err(err) = self.backend.request_mtu(mtu) {
            self.shared.mtu.clear();
            return Err(err);
        }
        let granted = self.shared.mtu.wait(rx, timeout).await?;
        debug!(requested = mtu, granted, "link budget negotiated");
        Ok(granted)
    }

    /// Enable or disable notifications on the notify characteristic.
    pub async fn set_notifications_enabled(&self, enabled: bool, timeout: Duration) -> Result<()> {
        self.ensure_connected()?;
        let rx = self.shared.notify.install()?;
        if let Err(err) = self.backend.set_notify(enabled) {
            self.shared.notify.clear();
            return Err(err);
        }
        let state = self.shared.notify.wait(rx, timeout).await?;
        if state != enabled {
            return Err(LinkError::Unavailable(format!(
                "notification state stuck at {state}"
            )));
        }
        Ok(())
    }

    /// Send one frame. There is no delivery acknowledgement.
    pub fn send_frame(&self, frame: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.backend.write_command(frame)
    }

    /// Wait for the next inbound notification.
    ///
    /// Returns `None` once the link is closed.
    pub async fn next_notification(&self) -> Option<Bytes> {
        self.inbound.lock().await.recv().await
    }

    /// Discard everything queued so far and return it.
    pub async fn drain_notifications(&self) -> Vec<Bytes> {
        let mut inbound = self.inbound.lock().await;
        let mut stale = Vec::new();
        while let Ok(frame) = inbound.try_recv() {
            stale.push(frame);
        }
        stale
    }

    /// Request a link-level disconnect and wait for it to complete.
    ///
    /// Marks the disconnect as caller-initiated, so no [`LinkEvent::Dropped`]
    /// is published for it.
    pub async fn disconnect(&self, timeout: Duration) -> Result<()> {
        self.shared.disconnect_requested.store(true, Ordering::SeqCst);
        if !self.is_connected() {
            return Ok(());
        }
        let completed = self.shared.disconnected.notified();
        self.backend.disconnect();
        tokio::time::timeout(timeout, completed)
            .await
            .map_err(|_| LinkError::Timeout {
                op: "disconnect",
                after: timeout,
            })
    }

    /// Release the link. Pending operations fail and the inbound queue ends.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.disconnect_requested.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_pending(&LinkError::Closed);
        self.shared
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.backend.close();
        debug!(device = %self.device, "link closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_connected() {
            return Err(LinkError::Unavailable("not connected".to_string()));
        }
        Ok(())
    }
}

impl Drop for GattLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for GattLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattLink")
            .field("device", &self.device)
            .field("connected", &self.is_connected())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}
