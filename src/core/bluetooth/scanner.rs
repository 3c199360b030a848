use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{OPENER_SERVICE_UUID, TARGET_DEVICE_NAME};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::radio::{Advertisement, AdvertisementStream, RadioPlatform};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{PeripheralIdentity, ScanState};

/// Live handles for one scan session
pub struct ScanTicket {
    /// Latest discovered-device list (replayed on subscribe, updated as
    /// advertisements arrive)
    pub devices: watch::Receiver<Vec<PeripheralIdentity>>,
    /// Resolves `true` when the window elapses; dropped without a value when
    /// the scan is stopped or superseded first
    pub completion: oneshot::Receiver<bool>,
}

/// Drives time-boxed discovery of opener peripherals.
/// At most one session is active at a time; each session carries an id so a
/// stale window timer or a superseded task can never touch a newer session's
/// state.
pub struct DeviceScanner {
    radio: Arc<dyn RadioPlatform>,
    events: Arc<EventHub>,
    registry: Arc<DeviceRegistry>,
    inner: Arc<Mutex<ScanInner>>,
}

struct ScanInner {
    state: ScanState,
    session: u64,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DeviceScanner {
    pub fn new(
        radio: Arc<dyn RadioPlatform>,
        events: Arc<EventHub>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            radio,
            events,
            registry,
            inner: Arc::new(Mutex::new(ScanInner {
                state: ScanState::Idle,
                session: 0,
                cancel_token: CancellationToken::new(),
                task: None,
            })),
        }
    }

    /// Start a scan session bounded by `window`. A session already running
    /// is stopped first; its completion signal is dropped unresolved.
    pub async fn start_scan(&self, window: Duration) -> Result<ScanTicket, BleError> {
        if !self.radio.is_enabled().await {
            warn!("Scan requested while the radio is unavailable");
            return Err(BleError::RadioUnavailable);
        }

        let mut inner = self.inner.lock().await;
        if inner.state == ScanState::Scanning {
            info!("Scan already active, restarting");
            self.halt_session(&mut inner).await;
        }

        let stream = self.radio.begin_scan(&[OPENER_SERVICE_UUID]).await?;
        let saved = self.registry.saved_addresses().await;

        inner.session += 1;
        inner.state = ScanState::Scanning;
        let session = inner.session;
        let cancel_token = CancellationToken::new();
        inner.cancel_token = cancel_token.clone();

        // New session, fresh results.
        self.events.publish_discovered(Vec::new());

        let (done_tx, done_rx) = oneshot::channel();
        let radio = self.radio.clone();
        let events = self.events.clone();
        let shared = self.inner.clone();
        inner.task = Some(tokio::spawn(async move {
            Self::scan_session(
                radio,
                events,
                shared,
                session,
                stream,
                saved,
                window,
                cancel_token,
                done_tx,
            )
            .await;
        }));
        drop(inner);

        info!(
            "Scan session {} started with a {} ms window",
            session,
            window.as_millis()
        );
        Ok(ScanTicket {
            devices: self.events.discovered(),
            completion: done_rx,
        })
    }

    /// Stop the active session. Idempotent: a no-op when not scanning.
    pub async fn stop_scan(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ScanState::Idle {
            debug!("Stop requested but no scan is active");
            return;
        }
        self.halt_session(&mut inner).await;
        info!("Scan stopped");
    }

    /// Current scanner activity
    pub async fn state(&self) -> ScanState {
        self.inner.lock().await.state
    }

    // Tear down the running session while holding the state lock. The task
    // is aborted rather than awaited: its finalize path would need this same
    // lock, and the session bump makes any of its late effects no-ops.
    async fn halt_session(&self, inner: &mut ScanInner) {
        inner.cancel_token.cancel();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.state = ScanState::Idle;
        inner.session += 1;
        self.radio.end_scan().await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_session(
        radio: Arc<dyn RadioPlatform>,
        events: Arc<EventHub>,
        shared: Arc<Mutex<ScanInner>>,
        session: u64,
        mut stream: AdvertisementStream,
        saved: Vec<String>,
        window: Duration,
        cancel_token: CancellationToken,
        done_tx: oneshot::Sender<bool>,
    ) {
        let mut results: Vec<PeripheralIdentity> = Vec::new();
        let window_timer = tokio::time::sleep(window);
        tokio::pin!(window_timer);

        let completed = loop {
            tokio::select! {
                _ = &mut window_timer => {
                    debug!("Scan window elapsed");
                    break true;
                }
                _ = cancel_token.cancelled() => {
                    // A halt owns the state reset; nothing left to do here.
                    return;
                }
                next = stream.next() => {
                    match next {
                        Some(adv) => {
                            Self::record_advertisement(&events, &mut results, &saved, adv);
                        }
                        None => {
                            warn!("Advertisement stream ended before the window elapsed");
                            break false;
                        }
                    }
                }
            }
        };

        {
            let mut inner = shared.lock().await;
            if inner.session != session {
                return;
            }
            inner.state = ScanState::Idle;
            inner.task = None;
        }
        radio.end_scan().await;
        let _ = done_tx.send(completed);
        info!(
            "Scan session {} finished with {} device(s)",
            session,
            results.len()
        );
    }

    fn record_advertisement(
        events: &EventHub,
        results: &mut Vec<PeripheralIdentity>,
        saved: &[String],
        adv: Advertisement,
    ) {
        if !Self::accepts(&adv) {
            debug!("Ignoring advertisement from {}", adv.address);
            return;
        }

        match results.iter().position(|p| p.address == adv.address) {
            Some(idx) => {
                // Duplicate address: supersede the identity in place when the
                // packet carries a different name, never emit a second entry.
                if adv.name.is_some() && adv.name != results[idx].name {
                    results[idx] =
                        PeripheralIdentity::new(adv.address, adv.name, results[idx].saved);
                    events.publish_discovered(results.clone());
                }
            }
            None => {
                let is_saved = saved.iter().any(|address| *address == adv.address);
                info!(
                    "Discovered {} ({})",
                    adv.name.as_deref().unwrap_or("unnamed"),
                    adv.address
                );
                results.push(PeripheralIdentity::new(adv.address, adv.name, is_saved));
                events.publish_discovered(results.clone());
            }
        }
    }

    // Service-id match, with a name-pattern fallback for platforms whose
    // scan filters drop the service list from the callback payload.
    fn accepts(adv: &Advertisement) -> bool {
        adv.service_ids.iter().any(|id| *id == OPENER_SERVICE_UUID)
            || adv
                .name
                .as_deref()
                .map(|name| name.contains(TARGET_DEVICE_NAME))
                .unwrap_or(false)
    }
}
