//! Opener service facade for the garage door client
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::ServiceConfig;
use crate::core::bluetooth::commands::{CommandChannel, DoorCommand};
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::radio::RadioPlatform;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::{DeviceScanner, ScanTicket};
use crate::core::bluetooth::types::{ConnectionState, OperationState, PeripheralIdentity, ScanState};
use crate::storage::KeyValueStore;

/// Manages scanning, connection and command traffic for one garage opener
pub struct OpenerService {
    radio: Arc<dyn RadioPlatform>,
    events: Arc<EventHub>,
    registry: Arc<DeviceRegistry>,
    scanner: DeviceScanner,
    connection: Arc<ConnectionManager>,
    commands: Arc<CommandChannel>,
    config: ServiceConfig,
}

impl OpenerService {
    /// Creates a new OpenerService with default timings
    pub fn new(radio: Arc<dyn RadioPlatform>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(radio, store, ServiceConfig::default())
    }

    pub fn with_config(
        radio: Arc<dyn RadioPlatform>,
        store: Arc<dyn KeyValueStore>,
        config: ServiceConfig,
    ) -> Self {
        let events = Arc::new(EventHub::new());
        let registry = Arc::new(DeviceRegistry::new(
            store,
            radio.clone(),
            events.clone(),
        ));
        let commands = Arc::new(CommandChannel::new(events.clone(), config.command_timeout()));
        let scanner = DeviceScanner::new(radio.clone(), events.clone(), registry.clone());
        let connection = Arc::new(ConnectionManager::new(
            radio.clone(),
            events.clone(),
            commands.clone(),
        ));

        Self {
            radio,
            events,
            registry,
            scanner,
            connection,
            commands,
            config,
        }
    }

    /// Event hub handle for subscribing to state and device list changes
    pub fn events(&self) -> Arc<EventHub> {
        self.events.clone()
    }

    pub async fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    /// Scans for nearby openers using the configured discovery window
    pub async fn start_scan(&self) -> Result<ScanTicket, BleError> {
        self.scanner.start_scan(self.config.scan_window()).await
    }

    /// Scans with an explicit discovery window
    pub async fn start_scan_for(&self, window: Duration) -> Result<ScanTicket, BleError> {
        self.scanner.start_scan(window).await
    }

    pub async fn stop_scan(&self) {
        self.scanner.stop_scan().await
    }

    pub async fn scan_state(&self) -> ScanState {
        self.scanner.state().await
    }

    /// Connects to a peripheral and remembers it for later reconnects.
    /// The device is saved before the link attempt so a failed connect
    /// still leaves it available to `reconnect`.
    pub async fn connect(&self, peripheral: &PeripheralIdentity) -> Result<(), BleError> {
        self.registry.mark_saved(&peripheral.address).await;
        self.registry
            .record_last_connected(&peripheral.address)
            .await;
        self.connection.connect(peripheral).await?;
        info!(
            "Device {} successfully connected and recorded in the service.",
            peripheral.address
        );
        Ok(())
    }

    /// Connects to a previously saved address
    pub async fn connect_saved(&self, address: &str) -> Result<(), BleError> {
        let peripheral = self.registry.resolve(address).await;
        self.connect(&peripheral).await
    }

    /// Reconnects to the last peripheral this service connected to
    pub async fn reconnect(&self) -> Result<(), BleError> {
        let address = self
            .registry
            .last_connected()
            .await
            .ok_or_else(|| BleError::link("no previously connected peripheral on record"))?;
        self.connect_saved(&address).await
    }

    /// Disconnects the active link but keeps the peripheral handle around
    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    /// Disconnects and releases the peripheral handle entirely
    pub async fn close(&self) {
        self.connection.close().await
    }

    /// Sends a command over the active link and waits for the outcome
    pub async fn send(&self, command: &DoorCommand) -> Result<(), BleError> {
        let link = self
            .connection
            .active_link()
            .await
            .ok_or(BleError::NotConnected)?;
        self.commands.send(link.as_ref(), command).await
    }

    /// Fires the door trigger command
    pub async fn trigger(&self) -> Result<(), BleError> {
        self.send(&DoorCommand::Trigger).await
    }

    /// Drops the last-connected record so `reconnect` no longer targets it
    pub async fn forget_device(&self) {
        self.registry.forget_last_connected().await
    }

    /// Re-reads system-known peripherals, merges the saved list and
    /// publishes the result
    pub async fn refresh_known(&self) -> Vec<PeripheralIdentity> {
        self.registry.refresh_known().await
    }

    pub async fn saved_devices(&self) -> Vec<PeripheralIdentity> {
        self.registry.list_saved().await
    }

    pub async fn last_connected(&self) -> Option<String> {
        self.registry.last_connected().await
    }

    pub async fn connected_peripheral(&self) -> Option<PeripheralIdentity> {
        self.connection.connected_peripheral().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.events.connection_state()
    }

    pub fn operation_state(&self) -> OperationState {
        self.events.operation_state()
    }
}
