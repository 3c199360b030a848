//! Reactive state publication for the Bluetooth module.
//! Every published quantity is a last-value-wins channel: subscribers read
//! the latest value immediately and are woken on each change, but slow
//! observers never accumulate a backlog.

use tokio::sync::watch;

use crate::core::bluetooth::types::{ConnectionState, OperationState, PeripheralIdentity};

/// Publishes connection, operation and device-list changes to any number of
/// observers.
pub struct EventHub {
    connection: watch::Sender<ConnectionState>,
    operation: watch::Sender<OperationState>,
    discovered: watch::Sender<Vec<PeripheralIdentity>>,
    known: watch::Sender<Vec<PeripheralIdentity>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (operation, _) = watch::channel(OperationState::Idle);
        let (discovered, _) = watch::channel(Vec::new());
        let (known, _) = watch::channel(Vec::new());
        Self {
            connection,
            operation,
            discovered,
            known,
        }
    }

    /// Subscribe to connection-state changes
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Subscribe to operation-state changes
    pub fn operation(&self) -> watch::Receiver<OperationState> {
        self.operation.subscribe()
    }

    /// Subscribe to the discovered-device list of the current scan session
    pub fn discovered(&self) -> watch::Receiver<Vec<PeripheralIdentity>> {
        self.discovered.subscribe()
    }

    /// Subscribe to the saved/bonded device list
    pub fn known(&self) -> watch::Receiver<Vec<PeripheralIdentity>> {
        self.known.subscribe()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Current operation state
    pub fn operation_state(&self) -> OperationState {
        *self.operation.borrow()
    }

    /// Snapshot of the current scan session's results
    pub fn discovered_devices(&self) -> Vec<PeripheralIdentity> {
        self.discovered.borrow().clone()
    }

    /// Snapshot of the saved/bonded list
    pub fn known_devices(&self) -> Vec<PeripheralIdentity> {
        self.known.borrow().clone()
    }

    pub(crate) fn publish_connection(&self, next: ConnectionState) {
        Self::publish(&self.connection, next);
    }

    pub(crate) fn publish_operation(&self, next: OperationState) {
        Self::publish(&self.operation, next);
    }

    pub(crate) fn publish_discovered(&self, next: Vec<PeripheralIdentity>) {
        Self::publish(&self.discovered, next);
    }

    pub(crate) fn publish_known(&self, next: Vec<PeripheralIdentity>) {
        Self::publish(&self.known, next);
    }

    // Re-publishing an unchanged value must not wake observers, so repeated
    // resets (idempotent close, stop of an idle scan) stay invisible.
    fn publish<T: PartialEq>(sender: &watch::Sender<T>, next: T) {
        sender.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
