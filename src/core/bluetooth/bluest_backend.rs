//! Production radio backed by the cross-platform `bluest` crate.
//! Advertisements and notifications are pumped through owned tasks into
//! plain streams, and devices are cached by normalized address so a saved
//! peripheral can be reconnected without a fresh user-driven scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{DEVICE_LOOKUP_TIMEOUT_MS, LINK_POLL_INTERVAL_MS};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::radio::{
    stream_from_unbounded, Advertisement, AdvertisementStream, GattLink, LinkEvent,
    LinkEventStream, NotificationStream, RadioPlatform,
};

/// How long the availability probe waits before reporting the radio as off
const READY_PROBE_TIMEOUT_MS: u64 = 500;

struct ScanPump {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

/// Radio platform implementation over the system Bluetooth adapter
pub struct BluestRadio {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    scan: Mutex<Option<ScanPump>>,
}

impl BluestRadio {
    /// Acquire the default system adapter and wait for it to become usable
    pub async fn new() -> Result<Self, BleError> {
        let adapter = Adapter::default().await.ok_or_else(|| {
            warn!("No Bluetooth adapter found");
            BleError::RadioUnavailable
        })?;
        adapter.wait_available().await.map_err(|e| {
            warn!("Bluetooth adapter did not become available: {}", e);
            BleError::RadioUnavailable
        })?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            scan: Mutex::new(None),
        })
    }

    async fn cached_device(&self, address: &str) -> Option<Device> {
        self.devices.lock().await.get(address).cloned()
    }

    // Cold connect: the device is not in the cache, so run a short
    // unfiltered discovery until the address shows up or the deadline hits.
    async fn find_device(&self, address: &str) -> Result<Device, BleError> {
        info!("Device {} not cached, scanning to locate it", address);
        let mut scan_stream = self
            .adapter
            .scan(&[])
            .await
            .map_err(|e| BleError::link(format!("lookup scan failed: {}", e)))?;

        let deadline = tokio::time::sleep(Duration::from_millis(DEVICE_LOOKUP_TIMEOUT_MS));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(BleError::link(format!("peripheral {} not found", address)));
                }
                next = scan_stream.next() => {
                    match next {
                        Some(found) => {
                            let id = found.device.id().to_string();
                            if normalize_address(&id) == address {
                                let device = found.device;
                                self.devices
                                    .lock()
                                    .await
                                    .insert(address.to_string(), device.clone());
                                return Ok(device);
                            }
                        }
                        None => {
                            return Err(BleError::link(
                                "scan ended before the peripheral was found".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    async fn pump_advertisements(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        filter: Vec<Uuid>,
        tx: mpsc::UnboundedSender<Advertisement>,
        cancel_token: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut scan_stream = adapter.scan(&filter).await?;

        loop {
            tokio::select! {
                next = scan_stream.next() => {
                    match next {
                        Some(found) => {
                            let id = found.device.id().to_string();
                            let address = normalize_address(&id);
                            let name = found
                                .device
                                .name()
                                .ok()
                                .or_else(|| found.adv_data.local_name.clone());
                            debug!("Advertisement from {} ({:?})", address, name);

                            devices.lock().await.insert(address.clone(), found.device);
                            if tx
                                .send(Advertisement {
                                    address,
                                    name,
                                    service_ids: found.adv_data.services,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => {
                            info!("Platform scan stream ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RadioPlatform for BluestRadio {
    async fn is_enabled(&self) -> bool {
        let probe = tokio::time::timeout(
            Duration::from_millis(READY_PROBE_TIMEOUT_MS),
            self.adapter.wait_available(),
        );
        matches!(probe.await, Ok(Ok(())))
    }

    async fn known_peripherals(&self) -> Result<Vec<Advertisement>, BleError> {
        let connected = self
            .adapter
            .connected_devices()
            .await
            .map_err(|e| BleError::link(format!("known-device query failed: {}", e)))?;

        let mut known = Vec::new();
        let mut devices = self.devices.lock().await;
        for device in connected {
            let id = device.id().to_string();
            let address = normalize_address(&id);
            let name = device.name().ok();
            devices.insert(address.clone(), device);
            known.push(Advertisement {
                address,
                name,
                service_ids: Vec::new(),
            });
        }
        Ok(known)
    }

    async fn begin_scan(&self, service_filter: &[Uuid]) -> Result<AdvertisementStream, BleError> {
        if !self.is_enabled().await {
            return Err(BleError::RadioUnavailable);
        }
        self.end_scan().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let filter = service_filter.to_vec();
        let token = cancel_token.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = Self::pump_advertisements(adapter, devices, filter, tx, token).await {
                warn!("Scan pump ended with an error: {}", e);
            }
        });

        *self.scan.lock().await = Some(ScanPump { cancel_token, task });
        info!("Platform scan started");
        Ok(stream_from_unbounded(rx))
    }

    async fn end_scan(&self) {
        if let Some(pump) = self.scan.lock().await.take() {
            pump.cancel_token.cancel();
            if let Err(e) = pump.task.await {
                if !e.is_cancelled() {
                    warn!("Scan pump finished with a join error: {}", e);
                }
            }
            info!("Platform scan stopped");
        }
    }

    async fn open_link(&self, address: &str) -> Result<Arc<dyn GattLink>, BleError> {
        let device = match self.cached_device(address).await {
            Some(device) => device,
            None => self.find_device(address).await?,
        };

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| BleError::link(format!("connect failed: {}", e)))?;
        }

        Ok(Arc::new(BluestLink::new(
            self.adapter.clone(),
            device,
            address.to_string(),
        )))
    }
}

/// An open transport to one peripheral, with its resolved GATT database
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    address: String,
    resolved: Mutex<HashMap<Uuid, Vec<Characteristic>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BluestLink {
    fn new(adapter: Adapter, device: Device, address: String) -> Self {
        Self {
            adapter,
            device,
            address,
            resolved: Mutex::new(HashMap::new()),
            poller: Mutex::new(None),
        }
    }

    async fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<Characteristic> {
        let resolved = self.resolved.lock().await;
        resolved
            .get(&service)?
            .iter()
            .find(|c| c.uuid() == characteristic)
            .cloned()
    }

    async fn stop_poller(&self) {
        if let Some(task) = self.poller.lock().await.take() {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl GattLink for BluestLink {
    async fn discover_services(&self) -> Result<Vec<Uuid>, BleError> {
        let services = self
            .device
            .discover_services()
            .await
            .map_err(|e| BleError::link(format!("service discovery failed: {}", e)))?;

        let mut resolved = self.resolved.lock().await;
        resolved.clear();
        let mut ids = Vec::with_capacity(services.len());
        for service in &services {
            let uuid = service.uuid();
            ids.push(uuid);
            match service.discover_characteristics().await {
                Ok(characteristics) => {
                    resolved.insert(uuid, characteristics);
                }
                Err(e) => {
                    warn!("Characteristic discovery failed on {}: {}", uuid, e);
                    resolved.insert(uuid, Vec::new());
                }
            }
        }
        Ok(ids)
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.find_characteristic(service, characteristic)
            .await
            .is_some()
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let write_char = self
            .find_characteristic(service, characteristic)
            .await
            .ok_or(BleError::CharacteristicUnavailable)?;
        write_char
            .write(payload)
            .await
            .map_err(|e| BleError::WriteRejected(e.to_string()))
    }

    async fn subscribe_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, BleError> {
        let notify_char = self
            .find_characteristic(service, characteristic)
            .await
            .ok_or(BleError::CharacteristicUnavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            match notify_char.notify().await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(value) => {
                                if tx.send(value).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!("Notification stream error: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to enable notifications: {}", e);
                }
            }
        });
        Ok(stream_from_unbounded(rx))
    }

    async fn link_events(&self) -> LinkEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = self.device.clone();
        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(LINK_POLL_INTERVAL_MS));
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }
                if !device.is_connected().await {
                    let _ = tx.send(LinkEvent::Lost);
                    break;
                }
            }
        });
        *self.poller.lock().await = Some(task);
        stream_from_unbounded(rx)
    }

    async fn disconnect(&self) {
        self.stop_poller().await;
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.address);
            if let Err(e) = self.adapter.disconnect_device(&self.device).await {
                warn!("Disconnect from {} failed: {}", self.address, e);
            }
        } else {
            debug!("Device {} is not connected", self.address);
        }
    }

    async fn close(&self) {
        self.disconnect().await;
        self.resolved.lock().await.clear();
    }
}

/// Pull a MAC-style address out of a platform device id, normalized to
/// uppercase and colon-separated. Platforms that hide the MAC (macOS) fall
/// back to the opaque id, which is still stable per device.
fn normalize_address(device_id: &str) -> String {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase().replace('-', ":"))
        .unwrap_or_else(|| device_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_extracts_and_uppercases_mac() {
        assert_eq!(
            normalize_address("Dev_aa:bb:cc:dd:ee:ff"),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(
            normalize_address(r"\\?\BTHLEDevice#...#8&aa-bb-cc-dd-ee-ff"),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn normalize_falls_back_to_opaque_ids() {
        assert_eq!(
            normalize_address("6F9619FF-8B86-D011-B42D-00C04FC964FF-like"),
            "6F9619FF-8B86-D011-B42D-00C04FC964FF-like"
        );
    }
}
