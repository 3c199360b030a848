use std::sync::Arc;

use garagelink::core::bluetooth::mock::MockRadio;
use garagelink::{MemoryStore, OpenerService, PeripheralIdentity};

pub const OPENER_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Service wired to the scriptable radio with an in-memory store
pub fn service_with(radio: &Arc<MockRadio>) -> Arc<OpenerService> {
    Arc::new(OpenerService::new(
        radio.clone(),
        Arc::new(MemoryStore::new()),
    ))
}

/// The opener peripheral as a scan would report it
pub fn opener() -> PeripheralIdentity {
    PeripheralIdentity::new(OPENER_ADDRESS, Some("Garage Door".to_string()), false)
}

/// Let spawned tasks and event watchers run to quiescence
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
