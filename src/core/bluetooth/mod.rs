//! Bluetooth functionality for the garage opener client
//! This module handles all bluetooth operations including scanning,
//! connecting, and sending commands to the opener peripheral.

mod bluest_backend;
mod commands;
mod connection;
pub mod constants;
mod error;
mod events;
mod manager;
pub mod mock;
mod notification;
mod radio;
mod registry;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_backend::BluestRadio;
pub use commands::{CommandChannel, DoorCommand};
pub use connection::ConnectionManager;
pub use constants::*; // Re-export all constants
pub use error::BleError;
pub use events::EventHub;
pub use manager::OpenerService;
pub use radio::{Advertisement, GattLink, LinkEvent, RadioPlatform};
pub use registry::DeviceRegistry;
pub use scanner::{DeviceScanner, ScanTicket};
pub use types::{ConnectionState, OperationState, PeripheralIdentity, ScanState};
