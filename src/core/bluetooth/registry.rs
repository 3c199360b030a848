//! Saved and platform-known device tracking.
//! The saved-address list and the last-connected record live in the
//! key-value store; the platform's own device list is merged in on refresh.
//! Store failures never propagate out of the registry.

use std::sync::Arc;

use log::{debug, warn};

use crate::core::bluetooth::constants::TARGET_DEVICE_NAME;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::radio::RadioPlatform;
use crate::core::bluetooth::types::PeripheralIdentity;
use crate::storage::KeyValueStore;

const SAVED_DEVICES_KEY: &str = "savedDevices";
const LAST_CONNECTED_KEY: &str = "lastConnectedDevice";

/// Tracks which peripherals the user has saved and which ones the platform
/// already knows about.
pub struct DeviceRegistry {
    store: Arc<dyn KeyValueStore>,
    radio: Arc<dyn RadioPlatform>,
    events: Arc<EventHub>,
}

impl DeviceRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        radio: Arc<dyn RadioPlatform>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            store,
            radio,
            events,
        }
    }

    /// Addresses in the saved-device list, oldest first
    pub async fn saved_addresses(&self) -> Vec<String> {
        let raw = match self.store.get_string(SAVED_DEVICES_KEY).await {
            Some(raw) => raw,
            None => return Vec::new(),
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!("Saved-device list is malformed ({}), treating as empty.", e);
                Vec::new()
            }
        }
    }

    /// Saved addresses as identities
    pub async fn list_saved(&self) -> Vec<PeripheralIdentity> {
        self.saved_addresses()
            .await
            .into_iter()
            .map(PeripheralIdentity::saved_address)
            .collect()
    }

    pub async fn is_saved(&self, address: &str) -> bool {
        self.saved_addresses()
            .await
            .iter()
            .any(|saved| saved == address)
    }

    /// Add an address to the saved list. Idempotent; store failures are
    /// logged and swallowed.
    pub async fn mark_saved(&self, address: &str) {
        let mut addresses = self.saved_addresses().await;
        if addresses.iter().any(|saved| saved == address) {
            debug!("Device {} already saved", address);
            return;
        }
        addresses.push(address.to_string());

        match serde_json::to_string(&addresses) {
            Ok(json) => {
                if let Err(e) = self.store.put_string(SAVED_DEVICES_KEY, &json).await {
                    warn!("Failed to persist saved-device list: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode saved-device list: {}", e),
        }

        self.publish_saved(address);
    }

    /// Record the address of the most recently attempted connection
    pub async fn record_last_connected(&self, address: &str) {
        if let Err(e) = self.store.put_string(LAST_CONNECTED_KEY, address).await {
            warn!("Failed to persist last-connected address: {}", e);
        }
    }

    /// Address of the most recently attempted connection, if any
    pub async fn last_connected(&self) -> Option<String> {
        self.store
            .get_string(LAST_CONNECTED_KEY)
            .await
            .filter(|address| !address.is_empty())
    }

    /// Drop the last-connected record so no automatic reconnect target
    /// remains
    pub async fn forget_last_connected(&self) {
        if let Err(e) = self.store.remove(LAST_CONNECTED_KEY).await {
            warn!("Failed to remove last-connected address: {}", e);
        }
    }

    /// Query the platform's known peripherals, keep the ones that look like
    /// an opener (name match) or that the user saved, merge in saved
    /// addresses the platform no longer reports, and republish the list.
    pub async fn refresh_known(&self) -> Vec<PeripheralIdentity> {
        let saved = self.saved_addresses().await;

        let platform = match self.radio.known_peripherals().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Known-peripheral query failed ({}), using saved list only.", e);
                Vec::new()
            }
        };

        let mut known: Vec<PeripheralIdentity> = Vec::new();
        for adv in platform {
            let name_matches = adv
                .name
                .as_deref()
                .map(|name| name.contains(TARGET_DEVICE_NAME))
                .unwrap_or(false);
            let is_member = saved.iter().any(|address| *address == adv.address);
            if name_matches || is_member {
                known.push(PeripheralIdentity::new(adv.address, adv.name, is_member));
            }
        }

        for address in saved {
            if !known.iter().any(|p| p.address == address) {
                known.push(PeripheralIdentity::saved_address(address));
            }
        }

        self.events.publish_known(known.clone());
        known
    }

    /// Best identity available for a bare address: a discovered entry, a
    /// known entry, or an address-only identity.
    pub async fn resolve(&self, address: &str) -> PeripheralIdentity {
        if let Some(found) = self
            .events
            .discovered_devices()
            .into_iter()
            .find(|p| p.address == address)
        {
            return found;
        }
        if let Some(found) = self
            .events
            .known_devices()
            .into_iter()
            .find(|p| p.address == address)
        {
            return found;
        }
        let saved = self.is_saved(address).await;
        PeripheralIdentity::new(address, None, saved)
    }

    // Fold a newly saved address into the published known list without a
    // platform round trip.
    fn publish_saved(&self, address: &str) {
        let mut known = self.events.known_devices();
        match known.iter_mut().find(|p| p.address == address) {
            Some(entry) => {
                *entry = PeripheralIdentity::new(entry.address.clone(), entry.name.clone(), true);
            }
            None => known.push(PeripheralIdentity::saved_address(address)),
        }
        self.events.publish_known(known);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::mock::MockRadio;
    use crate::storage::MemoryStore;

    fn registry_with(radio: Arc<MockRadio>) -> (DeviceRegistry, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let events = Arc::new(EventHub::new());
        (
            DeviceRegistry::new(store.clone(), radio, events),
            store,
        )
    }

    #[tokio::test]
    async fn malformed_saved_list_reads_as_empty() {
        let (registry, store) = registry_with(Arc::new(MockRadio::new()));
        store
            .put_string(SAVED_DEVICES_KEY, "definitely not json")
            .await
            .unwrap();

        assert!(registry.saved_addresses().await.is_empty());
        assert!(!registry.is_saved("AA:BB:CC:DD:EE:FF").await);
    }

    #[tokio::test]
    async fn mark_saved_is_idempotent() {
        let (registry, _store) = registry_with(Arc::new(MockRadio::new()));

        registry.mark_saved("AA:BB:CC:DD:EE:FF").await;
        registry.mark_saved("AA:BB:CC:DD:EE:FF").await;
        registry.mark_saved("11:22:33:44:55:66").await;

        let saved = registry.saved_addresses().await;
        assert_eq!(saved, vec!["AA:BB:CC:DD:EE:FF", "11:22:33:44:55:66"]);
    }

    #[tokio::test]
    async fn refresh_filters_on_name_or_saved_membership() {
        let radio = Arc::new(MockRadio::new());
        radio.set_known(vec![
            ("AA:AA:AA:AA:AA:AA", Some("Garage Door")),
            ("BB:BB:BB:BB:BB:BB", Some("Kitchen Speaker")),
            ("CC:CC:CC:CC:CC:CC", None),
        ]);
        let (registry, _store) = registry_with(radio);
        registry.mark_saved("CC:CC:CC:CC:CC:CC").await;
        registry.mark_saved("DD:DD:DD:DD:DD:DD").await;

        let known = registry.refresh_known().await;
        let addresses: Vec<&str> = known.iter().map(|p| p.address.as_str()).collect();

        // Name match, saved membership, and the saved-but-unseen extra.
        assert_eq!(
            addresses,
            vec![
                "AA:AA:AA:AA:AA:AA",
                "CC:CC:CC:CC:CC:CC",
                "DD:DD:DD:DD:DD:DD"
            ]
        );
        assert!(!known[0].saved);
        assert!(known[1].saved);
    }

    #[tokio::test]
    async fn last_connected_round_trip() {
        let (registry, _store) = registry_with(Arc::new(MockRadio::new()));

        assert_eq!(registry.last_connected().await, None);
        registry.record_last_connected("AA:BB:CC:DD:EE:FF").await;
        assert_eq!(
            registry.last_connected().await.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );

        registry.forget_last_connected().await;
        assert_eq!(registry.last_connected().await, None);
    }
}
