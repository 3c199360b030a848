//! Observe-only notification handling for the opener link.
//! The opener pushes short status strings ("Command executed") on the same
//! control characteristic; they are logged and otherwise ignored, and never
//! affect the command flow.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::core::bluetooth::constants::{CONTROL_CHARACTERISTIC_UUID, OPENER_SERVICE_UUID};
use crate::core::bluetooth::radio::GattLink;

/// Subscribe to the control characteristic and log everything the opener
/// pushes. The task dies with its connection; a failed subscription is a
/// warning, never an error.
pub(crate) fn spawn_watcher(link: Arc<dyn GattLink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match link
            .subscribe_notifications(OPENER_SERVICE_UUID, CONTROL_CHARACTERISTIC_UUID)
            .await
        {
            Ok(mut stream) => {
                info!("Subscribed to opener notifications");
                while let Some(payload) = stream.next().await {
                    debug!("Opener notification: {:?}", String::from_utf8_lossy(&payload));
                }
                info!("Notification stream ended");
            }
            Err(e) => {
                warn!("Failed to subscribe to notifications: {}", e);
            }
        }
    })
}
