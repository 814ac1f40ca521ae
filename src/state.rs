//! Application state management
//! Ties the scale link, the refill driver and the persisted settings together.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::KioskConfig;
use crate::config::pairing::PairedScale;
use crate::core::refill::RefillHandle;
#[cfg(feature = "bluest-backend")]
use crate::core::scale::BluestBackend;
use crate::core::scale::{ConnectionError, ScaleBackend, ScaleConnection, ScaleLink};

/// Global kiosk state
pub struct KioskState<B: ScaleBackend> {
    config_dir: PathBuf,
    config: KioskConfig,
    scale: ScaleLink<B>,
    refill: RefillHandle,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[cfg(feature = "bluest-backend")]
impl KioskState<BluestBackend> {
    /// Loads the config from `config_dir` and opens the Bluetooth adapter.
    pub async fn new(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        let config = KioskConfig::load(&config_dir).await?;
        info!("Initializing Bluetooth backend...");
        let backend = BluestBackend::new(&config.scale).await?;
        Ok(Self::with_backend(config_dir, config, backend))
    }
}

impl<B: ScaleBackend> KioskState<B> {
    /// Builds the state around `backend` and starts the refill driver.
    pub fn with_backend(config_dir: impl Into<PathBuf>, config: KioskConfig, backend: B) -> Self {
        let scale = ScaleLink::new(backend, config.scale.clone());
        let (refill, driver) = RefillHandle::spawn(config.refill.clone(), scale.feed());
        Self {
            config_dir: config_dir.into(),
            config,
            scale,
            refill,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn scale(&self) -> &ScaleLink<B> {
        &self.scale
    }

    pub fn refill(&self) -> &RefillHandle {
        &self.refill
    }

    /// Connects to the paired scale, or to any scale if none is paired.
    /// A new pairing is saved on success.
    pub async fn connect_scale(&self) -> Result<ScaleConnection, ConnectionError> {
        let paired = PairedScale::load(&self.config_dir)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read paired scale: {}", e);
                None
            });
        let preferred_name = paired.as_ref().map(|p| p.name.as_str());

        let connection = self.scale.connect(preferred_name).await?;

        if let Some(pairing) = PairedScale::from_connection(&connection) {
            if paired.as_ref() != Some(&pairing) {
                if let Err(e) = pairing.save(&self.config_dir).await {
                    warn!("Failed to save paired scale: {}", e);
                }
            }
        }
        Ok(connection)
    }

    /// Disconnects and keeps the pairing.
    pub async fn disconnect_scale(&self) {
        self.scale.disconnect().await;
    }

    /// Disconnects and forgets the paired scale.
    pub async fn forget_scale(&self) -> Result<()> {
        self.scale.disconnect().await;
        PairedScale::clear(&self.config_dir).await
    }

    /// Stops the refill driver and releases the scale.
    pub async fn shutdown(&self) {
        self.refill.shutdown();
        if let Some(driver) = self.driver.lock().await.take() {
            if let Err(e) = driver.await {
                warn!("Refill driver ended abnormally: {}", e);
            }
        }
        self.scale.disconnect().await;
        info!("Kiosk state shut down.");
    }
}
