//! Defines shared data structures for the Bluetooth module.

/// Identity of a discovered or remembered peripheral
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeripheralIdentity {
    /// Stable hardware identifier (MAC address on most platforms, an opaque
    /// platform id where the address is hidden)
    pub address: String,
    /// The advertised name, if any
    pub name: Option<String>,
    /// Whether the address is in the saved-device list
    pub saved: bool,
}

impl PeripheralIdentity {
    /// Creates a new PeripheralIdentity
    pub fn new(address: impl Into<String>, name: Option<String>, saved: bool) -> Self {
        Self {
            address: address.into(),
            name,
            saved,
        }
    }

    /// Identity for a bare saved address with no known name
    pub fn saved_address(address: impl Into<String>) -> Self {
        Self::new(address, None, true)
    }

    /// Name to show for this peripheral
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// State of the single managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome tracking for the command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OperationState {
    Idle,
    Sending,
    Success,
    Failed,
}

/// Scanner activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ScanState {
    Idle,
    Scanning,
}
