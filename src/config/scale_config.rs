use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::scale::{
    DEFAULT_DISCOVERY_TIMEOUT_SECS, DEFAULT_MIN_RSSI, DEFAULT_NOTIFICATION_BUFFER,
    UUID_SCALE_SERVICE, UUID_SCALE_WEIGHT_CHAR,
};
use crate::utils::{read_json, write_json};

const CONFIG_FILE_NAME: &str = "scale_config.json";

/// Scale link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Service the scale exposes its weight under
    pub service_uuid: Uuid,
    /// Notifiable characteristic carrying weight frames
    pub characteristic_uuid: Uuid,
    /// How long discovery runs before the selection counts as cancelled
    pub discovery_timeout_secs: u64,
    /// Weakest RSSI accepted during open discovery. `None` accepts any.
    pub min_rssi: Option<i16>,
    /// Raw frames buffered between the BLE stack and the decoder
    pub notification_buffer: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        ScaleConfig {
            service_uuid: UUID_SCALE_SERVICE,
            characteristic_uuid: UUID_SCALE_WEIGHT_CHAR,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            min_rssi: Some(DEFAULT_MIN_RSSI),
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

impl ScaleConfig {
    /// Loads the config from `config_dir`, falling back to defaults.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        match read_json(&file_path).await? {
            Some(config) => {
                info!("Scale config loaded from {:?}", file_path);
                Ok(config)
            }
            None => {
                warn!("Scale config file not found at {:?}, using default.", file_path);
                Ok(Self::default())
            }
        }
    }

    /// Saves the current config to `config_dir`.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        write_json(&file_path, self).await?;
        info!("Scale config saved to {:?}", file_path);
        Ok(())
    }
}
