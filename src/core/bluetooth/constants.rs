//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other fixed protocol values.

use uuid::Uuid;

/// Substring advertised in the opener's device name
pub const TARGET_DEVICE_NAME: &str = "Garage";

/// The UUID of the garage-door opener service
pub const OPENER_SERVICE_UUID: Uuid = Uuid::from_u128(0x9ba08ea3_3fa9_4622_bae5_bdd3f0c7fedf);

/// The UUID of the opener's control characteristic (write + notify)
pub const CONTROL_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x427c5c12_0f90_46be_ba43_7e4a207be489);

/// Command literal reserved for the primary door action
pub const TRIGGER_COMMAND: &str = "TRIGGER";

/// Scan window in milliseconds
pub const DEFAULT_SCAN_WINDOW_MS: u64 = 10_000;

/// Time to wait for a write acknowledgement in milliseconds
pub const COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Interval between link-liveness polls in milliseconds
pub const LINK_POLL_INTERVAL_MS: u64 = 1_000;

/// Deadline for locating a device by address before connecting, in milliseconds
pub const DEVICE_LOOKUP_TIMEOUT_MS: u64 = 12_000;
