pub mod pairing;
pub mod refill_config;
pub mod scale_config;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::refill_config::RefillConfig;
use crate::config::scale_config::ScaleConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    pub scale: ScaleConfig,
    pub refill: RefillConfig,
}

impl KioskConfig {
    /// Loads every config file in `config_dir`; missing files use defaults.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        Ok(KioskConfig {
            scale: ScaleConfig::load_config(config_dir).await?,
            refill: RefillConfig::load_config(config_dir).await?,
        })
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.scale.save_config(config_dir).await?;
        self.refill.save_config(config_dir).await
    }
}
