//! The previously paired scale, kept so reconnects skip open discovery.

use std::path::Path;

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::scale::ScaleConnection;
use crate::utils::{read_json, write_json};

const PAIRING_FILE_NAME: &str = "paired_scale.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedScale {
    pub id: String,
    pub name: String,
}

impl PairedScale {
    /// The pairing record for a live connection, if it identifies a device.
    pub fn from_connection(connection: &ScaleConnection) -> Option<Self> {
        Some(Self {
            id: connection.device_id.clone()?,
            name: connection.device_name.clone()?,
        })
    }

    pub async fn load(config_dir: &Path) -> Result<Option<Self>> {
        read_json(&config_dir.join(PAIRING_FILE_NAME)).await
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        write_json(&config_dir.join(PAIRING_FILE_NAME), self).await?;
        info!("Paired scale {:?} saved.", self.name);
        Ok(())
    }

    /// Forgets the pairing. Succeeds if there was none.
    pub async fn clear(config_dir: &Path) -> Result<()> {
        let file_path = config_dir.join(PAIRING_FILE_NAME);
        if fs::try_exists(&file_path).await? {
            fs::remove_file(&file_path).await?;
            info!("Paired scale cleared.");
        }
        Ok(())
    }
}
