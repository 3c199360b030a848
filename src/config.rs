//! Service configuration with JSON persistence

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{COMMAND_TIMEOUT_MS, DEFAULT_SCAN_WINDOW_MS};
use crate::utils::ensure_directory_exists;

/// Tunable timings for the opener service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long a discovery scan runs before stopping on its own
    pub scan_window_ms: u64,
    /// How long a command waits for its acknowledgement
    pub command_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: DEFAULT_SCAN_WINDOW_MS,
            command_timeout_ms: COMMAND_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Loads the configuration from `path`. A missing or malformed file
    /// falls back to the defaults rather than failing the caller.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        "Config file {} is malformed, using defaults: {}",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Saves the configuration as pretty-printed JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_directory_exists(parent).await?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, raw).await?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }
}
