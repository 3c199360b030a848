//! Abstract radio surface consumed by the scanner and connection manager.
//! The production implementation wraps the platform BLE stack; tests drive
//! the same traits with a scripted in-process radio.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;

/// A single advertisement event observed during a scan
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Stable hardware identifier of the advertiser
    pub address: String,
    /// Advertised local name, if present in the packet
    pub name: Option<String>,
    /// Service identifiers carried in the advertisement
    pub service_ids: Vec<Uuid>,
}

/// Asynchronous link-state signals delivered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport dropped without a local disconnect request
    Lost,
}

pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Adapt an unbounded mpsc receiver into a boxed stream
pub(crate) fn stream_from_unbounded<T: Send + 'static>(
    rx: tokio::sync::mpsc::UnboundedReceiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// Central-role radio operations
#[async_trait::async_trait]
pub trait RadioPlatform: Send + Sync {
    /// Whether the radio is powered and usable
    async fn is_enabled(&self) -> bool;

    /// Peripherals the platform already knows about (bonded or currently
    /// connected, depending on what the backend can see)
    async fn known_peripherals(&self) -> Result<Vec<Advertisement>, BleError>;

    /// Start advertising discovery. The stream ends when the platform stops
    /// the scan or `end_scan` is called.
    async fn begin_scan(&self, service_filter: &[Uuid]) -> Result<AdvertisementStream, BleError>;

    /// Stop an active scan; a no-op when none is running
    async fn end_scan(&self);

    /// Open a transport to the peripheral with the given address
    async fn open_link(&self, address: &str) -> Result<Arc<dyn GattLink>, BleError>;
}

/// An open GATT transport to a single peripheral
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    /// Run service discovery and report the service identifiers found
    async fn discover_services(&self) -> Result<Vec<Uuid>, BleError>;

    /// Whether the given characteristic is resolvable on the given service
    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;

    /// Write `payload` and await the peripheral's acknowledgement
    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError>;

    /// Subscribe to value notifications on the given characteristic
    async fn subscribe_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, BleError>;

    /// Stream of unsolicited link-state events. Yields at most one handout;
    /// later calls return an empty stream.
    async fn link_events(&self) -> LinkEventStream;

    /// Drop the transport but keep the handle allocated for a later
    /// reconnect or `close`
    async fn disconnect(&self);

    /// Release the transport entirely. Safe to call more than once.
    async fn close(&self);
}
