use std::fmt;

/// A connectable device as handed over by discovery.
///
/// The address is the identity: reconnection always reuses the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    /// Platform address (MAC on Linux/Android, UUID on Apple platforms).
    pub address: String,
    /// Advertised name, if discovery saw one.
    pub name: Option<String>,
}

impl DeviceHandle {
    /// Create a handle keyed by `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Attach the advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => f.write_str(&self.address),
        }
    }
}
