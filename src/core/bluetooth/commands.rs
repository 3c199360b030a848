//! Opener command vocabulary and the single-flight command channel.
//! One command may be in flight at a time; its outcome is decided by a race
//! between the platform acknowledgement and a fixed timeout, keyed by a
//! per-command id so exactly one path resolves it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    CONTROL_CHARACTERISTIC_UUID, OPENER_SERVICE_UUID, TRIGGER_COMMAND,
};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::radio::GattLink;
use crate::core::bluetooth::types::{ConnectionState, OperationState};

/// Commands understood by the opener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorCommand {
    /// Fire the door relay
    Trigger,
    /// Any other short text command, passed through unchanged
    Custom(String),
}

impl DoorCommand {
    /// Build a command from raw text, folding the reserved trigger literal
    /// onto its own variant
    pub fn custom(text: impl Into<String>) -> Self {
        let text = text.into();
        if text == TRIGGER_COMMAND {
            Self::Trigger
        } else {
            Self::Custom(text)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Trigger => TRIGGER_COMMAND,
            Self::Custom(text) => text,
        }
    }

    /// Convert the command to its wire representation
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }
}

struct InFlight {
    id: u64,
    payload: String,
    issued_at: Instant,
    cancel: CancellationToken,
}

enum WriteOutcome {
    Acked,
    Rejected(BleError),
    TimedOut,
}

/// Serializes command writes to the control characteristic and tracks each
/// command's outcome.
pub struct CommandChannel {
    events: Arc<EventHub>,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl CommandChannel {
    pub fn new(events: Arc<EventHub>, timeout: Duration) -> Self {
        Self {
            events,
            timeout,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Write `command` to the control characteristic and wait for the
    /// acknowledgement or the timeout, whichever comes first.
    pub async fn send(&self, link: &dyn GattLink, command: &DoorCommand) -> Result<(), BleError> {
        let (id, cancel) = self.admit(link, command).await?;

        let payload = command.to_bytes();
        let outcome = tokio::select! {
            result = link.write_characteristic(
                OPENER_SERVICE_UUID,
                CONTROL_CHARACTERISTIC_UUID,
                &payload,
            ) => match result {
                Ok(()) => WriteOutcome::Acked,
                Err(e) => WriteOutcome::Rejected(e),
            },
            _ = tokio::time::sleep(self.timeout) => WriteOutcome::TimedOut,
            // A teardown resolved this command and owns the state reset;
            // the caller hears about it now, not when the timer runs out.
            _ = cancel.cancelled() => {
                info!("Operation {} was aborted by a disconnect", id);
                return Err(BleError::link("connection lost while command in flight"));
            }
        };

        // Consume our own id. If it is gone, a disconnect resolved this
        // command first and also owns the state reset.
        let owned = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.id == id => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if !owned {
            info!("Operation {} was already resolved by a disconnect", id);
            return Err(BleError::link("connection lost while command in flight"));
        }

        match outcome {
            WriteOutcome::Acked => {
                info!("Operation {} acknowledged", id);
                self.events.publish_operation(OperationState::Success);
                Ok(())
            }
            WriteOutcome::Rejected(e) => {
                warn!("Operation {} rejected by the platform: {}", id, e);
                self.events.publish_operation(OperationState::Failed);
                Err(e)
            }
            WriteOutcome::TimedOut => {
                // Unlike a rejection, delivery is unknown here: the write may
                // still reach the peripheral. Not safely retryable.
                warn!(
                    "Operation {} got no acknowledgement within {:?}; delivery unknown",
                    id, self.timeout
                );
                self.events.publish_operation(OperationState::Failed);
                self.events.publish_operation(OperationState::Idle);
                Err(BleError::OperationTimeout(self.timeout))
            }
        }
    }

    // Single-flight admission. Holds the slot lock across the precondition
    // checks so a concurrent send cannot slip in between them, and publishes
    // SENDING under the same lock so a teardown that follows always observes
    // (and resets) this command.
    async fn admit(
        &self,
        link: &dyn GattLink,
        command: &DoorCommand,
    ) -> Result<(u64, CancellationToken), BleError> {
        let mut slot = self.in_flight.lock().await;

        if let Some(pending) = slot.as_ref() {
            warn!(
                "Rejecting {:?}: operation {} ({:?}) still in flight",
                command.as_str(),
                pending.id,
                pending.payload
            );
            return Err(BleError::AlreadyInFlight);
        }
        if self.events.connection_state() != ConnectionState::Connected {
            return Err(BleError::NotConnected);
        }
        if !link
            .has_characteristic(OPENER_SERVICE_UUID, CONTROL_CHARACTERISTIC_UUID)
            .await
        {
            warn!("Control characteristic is not resolvable on the live link");
            return Err(BleError::CharacteristicUnavailable);
        }

        // A latched terminal state from the previous command collapses now.
        if matches!(
            self.events.operation_state(),
            OperationState::Success | OperationState::Failed
        ) {
            self.events.publish_operation(OperationState::Idle);
        }
        self.events.publish_operation(OperationState::Sending);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        info!("Sending {:?} as operation {}", command.as_str(), id);
        *slot = Some(InFlight {
            id,
            payload: command.as_str().to_string(),
            issued_at: Instant::now(),
            cancel: cancel.clone(),
        });
        Ok((id, cancel))
    }

    /// Resolve any in-flight command as failed and reset the operation state
    /// to idle. Called by the connection teardown paths.
    pub(crate) async fn abort_in_flight(&self) {
        let aborted = self.in_flight.lock().await.take();
        if let Some(pending) = aborted {
            warn!(
                "Operation {} ({:?}) aborted by disconnect after {:?}",
                pending.id,
                pending.payload,
                pending.issued_at.elapsed()
            );
            // The slot entry is gone before the wakeup, so the sender can
            // only lose the race.
            pending.cancel.cancel();
            self.events.publish_operation(OperationState::Failed);
        } else {
            debug!("No command in flight to abort");
        }
        self.events.publish_operation(OperationState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_payload_is_the_reserved_literal() {
        assert_eq!(DoorCommand::Trigger.to_bytes(), b"TRIGGER".to_vec());
        assert_eq!(DoorCommand::Trigger.as_str(), "TRIGGER");
    }

    #[test]
    fn custom_text_passes_through_unchanged() {
        let cmd = DoorCommand::custom("STATUS");
        assert_eq!(cmd, DoorCommand::Custom("STATUS".into()));
        assert_eq!(cmd.to_bytes(), b"STATUS".to_vec());
    }

    #[test]
    fn custom_folds_reserved_literal_onto_trigger() {
        assert_eq!(DoorCommand::custom("TRIGGER"), DoorCommand::Trigger);
    }
}
