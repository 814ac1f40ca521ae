use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::utils::{read_json, write_json};

const CONFIG_FILE_NAME: &str = "refill_config.json";

/// Timings and pricing for the refill flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefillConfig {
    /// How long the welcome screen stays up before moving on
    pub welcome_dwell_ms: u64,
    /// How long a weight must hold unchanged before it can be confirmed
    pub stability_window_ms: u64,
    /// How long the tare result is shown before the fill step
    pub tare_advance_ms: u64,
    /// Inactivity before the session resets. `None` disables the timeout.
    pub idle_timeout_ms: Option<u64>,
    /// Added to the total when the customer buys a container
    pub container_fee: u64,
}

impl Default for RefillConfig {
    fn default() -> Self {
        RefillConfig {
            welcome_dwell_ms: 2_000,
            stability_window_ms: 1_000,
            tare_advance_ms: 3_000,
            idle_timeout_ms: Some(300_000),
            container_fee: 500,
        }
    }
}

impl RefillConfig {
    pub fn welcome_dwell(&self) -> Duration {
        Duration::from_millis(self.welcome_dwell_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn tare_advance(&self) -> Duration {
        Duration::from_millis(self.tare_advance_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Loads the config from `config_dir`, falling back to defaults.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        match read_json(&file_path).await? {
            Some(config) => {
                info!("Refill config loaded from {:?}", file_path);
                Ok(config)
            }
            None => {
                warn!("Refill config file not found at {:?}, using default.", file_path);
                Ok(Self::default())
            }
        }
    }

    /// Saves the current config to `config_dir`.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        write_json(&file_path, self).await?;
        info!("Refill config saved to {:?}", file_path);
        Ok(())
    }
}
