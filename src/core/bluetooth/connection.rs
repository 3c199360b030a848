//! Connection lifecycle for the opener link.
//! This module owns the single live connection: opening the transport,
//! gating CONNECTED on discovery of the opener service, watching for link
//! loss, and the graceful-disconnect / full-close teardown paths.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::bluetooth::commands::CommandChannel;
use crate::core::bluetooth::constants::OPENER_SERVICE_UUID;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::notification;
use crate::core::bluetooth::radio::{GattLink, LinkEvent, RadioPlatform};
use crate::core::bluetooth::types::{ConnectionState, PeripheralIdentity};

/// Ownership states of the transport handle.
/// `Parked` is a gracefully disconnected handle that `close` has not
/// released yet; `Live` is a committed, fully connected link.
enum LinkSlot {
    Empty,
    Parked(Arc<dyn GattLink>),
    Live(LiveLink),
}

struct LiveLink {
    generation: u64,
    peripheral: PeripheralIdentity,
    link: Arc<dyn GattLink>,
    monitor: JoinHandle<()>,
    notifications: JoinHandle<()>,
}

struct ConnInner {
    /// Bumped by every connect attempt and every teardown; an await-holding
    /// path may only commit its effects while its recorded value is current.
    generation: u64,
    slot: LinkSlot,
}

enum Drain {
    None,
    Disconnect(Arc<dyn GattLink>),
    Close(Arc<dyn GattLink>),
}

/// Manages the lifecycle of the single active connection
pub struct ConnectionManager {
    radio: Arc<dyn RadioPlatform>,
    events: Arc<EventHub>,
    commands: Arc<CommandChannel>,
    inner: Arc<Mutex<ConnInner>>,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn RadioPlatform>,
        events: Arc<EventHub>,
        commands: Arc<CommandChannel>,
    ) -> Self {
        Self {
            radio,
            events,
            commands,
            inner: Arc::new(Mutex::new(ConnInner {
                generation: 0,
                slot: LinkSlot::Empty,
            })),
        }
    }

    /// Connect to `peripheral`: open the transport, require the opener
    /// service to be present, then commit the link and start its watchers.
    /// Any existing connection is torn down first.
    pub async fn connect(&self, peripheral: &PeripheralIdentity) -> Result<(), BleError> {
        // Checked before the overwrite teardown: an attempt that cannot
        // start leaves any existing connection untouched.
        if !self.radio.is_enabled().await {
            warn!("Connect requested while the radio is unavailable");
            return Err(BleError::link("bluetooth radio is unavailable"));
        }

        // Overwrite guard: never leak a prior transport.
        self.teardown(true, "superseded by a new connect").await;

        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.generation
        };

        info!(
            "Connecting to {} ({})",
            peripheral.display_name(),
            peripheral.address
        );
        self.events.publish_connection(ConnectionState::Connecting);

        let link = match self.radio.open_link(&peripheral.address).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Failed to open link to {}: {}", peripheral.address, e);
                self.resolve_failed_attempt(generation).await;
                return Err(as_link_failure(e));
            }
        };

        let services = match link.discover_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!("Service discovery failed on {}: {}", peripheral.address, e);
                link.close().await;
                self.resolve_failed_attempt(generation).await;
                return Err(as_link_failure(e));
            }
        };
        if !services.contains(&OPENER_SERVICE_UUID) {
            for service in &services {
                info!("Available service: {}", service);
            }
            warn!(
                "Opener service not found on {}, treating as connection failure",
                peripheral.address
            );
            link.close().await;
            self.resolve_failed_attempt(generation).await;
            return Err(BleError::link("opener service not found on peripheral"));
        }

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            drop(inner);
            info!("Connect attempt {} was superseded, closing orphaned link", generation);
            link.close().await;
            return Err(BleError::link("superseded by a newer request"));
        }
        inner.slot = LinkSlot::Live(LiveLink {
            generation,
            peripheral: peripheral.clone(),
            link: link.clone(),
            monitor: self.spawn_monitor(generation, link.clone()),
            notifications: notification::spawn_watcher(link),
        });
        drop(inner);

        self.events.publish_connection(ConnectionState::Connected);
        info!("Connected to {}", peripheral.display_name());
        Ok(())
    }

    /// Graceful disconnect: the transport drops but the handle stays
    /// allocated until `close`. Resolves any in-flight command as failed.
    pub async fn disconnect(&self) {
        self.teardown(false, "disconnect requested").await;
    }

    /// Release the transport handle entirely. Idempotent; safe when already
    /// disconnected.
    pub async fn close(&self) {
        self.teardown(true, "close requested").await;
    }

    /// The live link, present only while CONNECTED
    pub async fn active_link(&self) -> Option<Arc<dyn GattLink>> {
        match &self.inner.lock().await.slot {
            LinkSlot::Live(live) => Some(live.link.clone()),
            _ => None,
        }
    }

    /// Identity of the connected peripheral, if any
    pub async fn connected_peripheral(&self) -> Option<PeripheralIdentity> {
        match &self.inner.lock().await.slot {
            LinkSlot::Live(live) => Some(live.peripheral.clone()),
            _ => None,
        }
    }

    // Shared teardown for disconnect/close/overwrite. Publishes DISCONNECTED
    // before aborting the command channel so a send admitted mid-teardown
    // observes the state change (admission re-checks it under its own lock).
    async fn teardown(&self, release_handle: bool, reason: &str) {
        let drain = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            match std::mem::replace(&mut inner.slot, LinkSlot::Empty) {
                LinkSlot::Empty => Drain::None,
                LinkSlot::Parked(link) => {
                    if release_handle {
                        debug!("Releasing parked transport handle ({})", reason);
                        Drain::Close(link)
                    } else {
                        inner.slot = LinkSlot::Parked(link);
                        Drain::None
                    }
                }
                LinkSlot::Live(live) => {
                    info!(
                        "Tearing down connection to {} ({})",
                        live.peripheral.display_name(),
                        reason
                    );
                    live.monitor.abort();
                    live.notifications.abort();
                    if release_handle {
                        Drain::Close(live.link)
                    } else {
                        inner.slot = LinkSlot::Parked(live.link.clone());
                        Drain::Disconnect(live.link)
                    }
                }
            }
        };

        self.events.publish_connection(ConnectionState::Disconnected);
        self.commands.abort_in_flight().await;

        match drain {
            Drain::None => {}
            Drain::Disconnect(link) => link.disconnect().await,
            Drain::Close(link) => link.close().await,
        }
    }

    // Revert to DISCONNECTED after a failed attempt, unless a newer request
    // already owns the published state.
    async fn resolve_failed_attempt(&self, generation: u64) {
        let inner = self.inner.lock().await;
        if inner.generation == generation {
            self.events.publish_connection(ConnectionState::Disconnected);
        }
    }

    fn spawn_monitor(&self, generation: u64, link: Arc<dyn GattLink>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let events = self.events.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let mut stream = link.link_events().await;
            while let Some(event) = stream.next().await {
                match event {
                    LinkEvent::Lost => {
                        Self::handle_link_lost(&inner, &events, &commands, generation).await;
                        return;
                    }
                }
            }
        })
    }

    // Unsolicited link loss. Consumes the live slot exactly once for this
    // generation; a stale signal from an older connection is a no-op.
    async fn handle_link_lost(
        inner: &Mutex<ConnInner>,
        events: &EventHub,
        commands: &CommandChannel,
        generation: u64,
    ) {
        let live = {
            let mut guard = inner.lock().await;
            match std::mem::replace(&mut guard.slot, LinkSlot::Empty) {
                LinkSlot::Live(live) if live.generation == generation => {
                    guard.generation += 1;
                    live
                }
                other => {
                    guard.slot = other;
                    debug!("Ignoring stale link-lost signal for generation {}", generation);
                    return;
                }
            }
        };

        warn!("Link to {} lost", live.peripheral.display_name());
        live.notifications.abort();
        events.publish_connection(ConnectionState::Disconnected);
        commands.abort_in_flight().await;
        // A fatal disconnect releases the handle; only a requested
        // disconnect parks it.
        live.link.close().await;
    }
}

fn as_link_failure(e: BleError) -> BleError {
    match e {
        BleError::LinkFailure(_) => e,
        other => BleError::link(other.to_string()),
    }
}
