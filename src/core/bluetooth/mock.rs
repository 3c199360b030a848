//! Scriptable in-process radio.
//! Implements the same traits as the production backend so the scanner,
//! connection manager and command channel can be exercised without hardware:
//! tests toggle radio power, inject advertisements into an open scan, script
//! per-write outcomes, and fire link loss on demand.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use crate::core::bluetooth::constants::{CONTROL_CHARACTERISTIC_UUID, OPENER_SERVICE_UUID};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::radio::{
    stream_from_unbounded, Advertisement, AdvertisementStream, GattLink, LinkEvent,
    LinkEventStream, NotificationStream, RadioPlatform,
};

/// Scripted outcome for a single characteristic write
pub enum WriteScript {
    /// Acknowledge immediately
    Ack,
    /// Acknowledge after a delay
    AckAfter(Duration),
    /// Report a platform write failure
    Reject(String),
    /// Never answer; only the caller's timeout resolves the write
    Never,
}

/// A fake radio with scriptable peripherals
pub struct MockRadio {
    enabled: AtomicBool,
    known: Mutex<Vec<Advertisement>>,
    links: Mutex<HashMap<String, Arc<MockLink>>>,
    scan_feed: Mutex<Option<UnboundedSender<Advertisement>>>,
    fail_next_connect: Mutex<Option<String>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            known: Mutex::new(Vec::new()),
            links: Mutex::new(HashMap::new()),
            scan_feed: Mutex::new(None),
            fail_next_connect: Mutex::new(None),
        }
    }

    /// Toggle radio power
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Replace the platform's known-device list
    pub fn set_known(&self, entries: Vec<(&str, Option<&str>)>) {
        *self.known.lock().unwrap() = entries
            .into_iter()
            .map(|(address, name)| Advertisement {
                address: address.to_string(),
                name: name.map(str::to_string),
                service_ids: Vec::new(),
            })
            .collect();
    }

    /// Register a connectable peripheral and return its link script
    pub fn add_peripheral(&self, address: &str) -> Arc<MockLink> {
        let link = Arc::new(MockLink::new(address));
        self.links
            .lock()
            .unwrap()
            .insert(address.to_string(), link.clone());
        link
    }

    /// Make the next `open_link` fail with the given message
    pub fn fail_next_connect(&self, message: &str) {
        *self.fail_next_connect.lock().unwrap() = Some(message.to_string());
    }

    /// Inject an advertisement into the currently open scan
    pub fn advertise(&self, adv: Advertisement) {
        if let Some(feed) = self.scan_feed.lock().unwrap().as_ref() {
            let _ = feed.send(adv);
        }
    }

    /// Inject an opener advertisement (service id + name) into the scan
    pub fn advertise_opener(&self, address: &str, name: &str) {
        self.advertise(Advertisement {
            address: address.to_string(),
            name: Some(name.to_string()),
            service_ids: vec![OPENER_SERVICE_UUID],
        });
    }

    /// Whether a scan feed is currently open
    pub fn scanning(&self) -> bool {
        self.scan_feed.lock().unwrap().is_some()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RadioPlatform for MockRadio {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn known_peripherals(&self) -> Result<Vec<Advertisement>, BleError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(BleError::RadioUnavailable);
        }
        Ok(self.known.lock().unwrap().clone())
    }

    async fn begin_scan(&self, _service_filter: &[Uuid]) -> Result<AdvertisementStream, BleError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(BleError::RadioUnavailable);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.scan_feed.lock().unwrap() = Some(tx);
        Ok(stream_from_unbounded(rx))
    }

    async fn end_scan(&self) {
        self.scan_feed.lock().unwrap().take();
    }

    async fn open_link(&self, address: &str) -> Result<Arc<dyn GattLink>, BleError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(BleError::RadioUnavailable);
        }
        if let Some(message) = self.fail_next_connect.lock().unwrap().take() {
            return Err(BleError::link(message));
        }
        let link = self
            .links
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| BleError::link(format!("no peripheral at {}", address)))?;
        link.reset_transport();
        Ok(link)
    }
}

/// One scriptable peripheral transport
pub struct MockLink {
    address: String,
    services: Mutex<Vec<Uuid>>,
    characteristics: Mutex<Vec<(Uuid, Uuid)>>,
    write_scripts: Mutex<VecDeque<WriteScript>>,
    writes: Mutex<Vec<Vec<u8>>>,
    events_tx: Mutex<Option<UnboundedSender<LinkEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    notify_tx: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    disconnected: AtomicBool,
    closed: AtomicBool,
}

impl MockLink {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            services: Mutex::new(vec![OPENER_SERVICE_UUID]),
            characteristics: Mutex::new(vec![(OPENER_SERVICE_UUID, CONTROL_CHARACTERISTIC_UUID)]),
            write_scripts: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            events_tx: Mutex::new(None),
            events_rx: Mutex::new(None),
            notify_tx: Mutex::new(None),
            disconnected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    // A fresh transport for each open: flags cleared and a new link-event
    // channel armed.
    fn reset_transport(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events_tx.lock().unwrap() = Some(tx);
        *self.events_rx.lock().unwrap() = Some(rx);
    }

    /// Replace the services reported by discovery
    pub fn set_services(&self, services: Vec<Uuid>) {
        *self.services.lock().unwrap() = services;
    }

    /// Remove every characteristic, making resolution fail
    pub fn clear_characteristics(&self) {
        self.characteristics.lock().unwrap().clear();
    }

    /// Queue the outcome for the next write
    pub fn script_write(&self, script: WriteScript) {
        self.write_scripts.lock().unwrap().push_back(script);
    }

    /// Simulate an unsolicited link loss
    pub fn drop_link(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(LinkEvent::Lost);
        }
    }

    /// Push a notification payload to the current subscriber
    pub fn push_notification(&self, payload: &[u8]) {
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.send(payload.to_vec());
        }
    }

    /// Payloads written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn transport_up(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GattLink for MockLink {
    async fn discover_services(&self) -> Result<Vec<Uuid>, BleError> {
        if !self.transport_up() {
            return Err(BleError::link(format!("transport to {} is down", self.address)));
        }
        Ok(self.services.lock().unwrap().clone())
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.characteristics
            .lock()
            .unwrap()
            .iter()
            .any(|(s, c)| *s == service && *c == characteristic)
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        if !self.transport_up() {
            return Err(BleError::link(format!("transport to {} is down", self.address)));
        }
        if !self.has_characteristic(service, characteristic).await {
            return Err(BleError::CharacteristicUnavailable);
        }
        self.writes.lock().unwrap().push(payload.to_vec());

        let script = self
            .write_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(WriteScript::Ack);
        match script {
            WriteScript::Ack => Ok(()),
            WriteScript::AckAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            WriteScript::Reject(message) => Err(BleError::WriteRejected(message)),
            WriteScript::Never => {
                futures_util::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn subscribe_notifications(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify_tx.lock().unwrap() = Some(tx);
        Ok(stream_from_unbounded(rx))
    }

    async fn link_events(&self) -> LinkEventStream {
        match self.events_rx.lock().unwrap().take() {
            Some(rx) => stream_from_unbounded(rx),
            None => Box::pin(futures_util::stream::empty()),
        }
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}
