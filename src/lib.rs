//! Garage opener BLE client library
//! Scans for, connects to and commands an ESP32 based garage door opener
//! over a single writable GATT characteristic.

// Module declarations
pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use crate::core::bluetooth::{
    BleError, BluestRadio, ConnectionState, DoorCommand, EventHub, OpenerService, OperationState,
    PeripheralIdentity, ScanState, ScanTicket,
};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
