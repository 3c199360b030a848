//! Error taxonomy for the Bluetooth module.
//! Every failure is reported to the immediate caller; none are fatal to the
//! process, and each one leaves the state machines in a stable state.

use std::time::Duration;

/// Failures surfaced by scan, connect and command operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum BleError {
    /// Bluetooth is off or no adapter is present; the operation never started
    #[error("bluetooth radio is unavailable")]
    RadioUnavailable,

    /// The connection attempt failed, the target service was absent after
    /// discovery, or the link dropped mid-operation
    #[error("link failure: {0}")]
    LinkFailure(String),

    /// A command was issued while not connected; rejected locally, no radio I/O
    #[error("not connected to a peripheral")]
    NotConnected,

    /// The control characteristic could not be resolved on the live link
    #[error("control characteristic unavailable")]
    CharacteristicUnavailable,

    /// The platform reported a write failure
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// No acknowledgement arrived within the timeout window; actual delivery
    /// is unknown
    #[error("no acknowledgement within {0:?}")]
    OperationTimeout(Duration),

    /// A command is already in flight
    #[error("another command is already in flight")]
    AlreadyInFlight,
}

impl BleError {
    pub(crate) fn link(message: impl Into<String>) -> Self {
        Self::LinkFailure(message.into())
    }
}
