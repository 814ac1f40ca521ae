//! bluest implementation of the scale backend
//! Handles adapter setup, GATT binding and teardown for the real scale.

use std::time::Duration;

use bluest::{Adapter, Characteristic, Device, Uuid};
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::scale_config::ScaleConfig;
use crate::core::scale::backend::ScaleBackend;
use crate::core::scale::error::ConnectionError;
use crate::core::scale::notification;
use crate::core::scale::scanner::{ScaleScanner, extract_mac_address};
use crate::core::scale::types::{DiscoveryFilter, ScaleDevice};

#[derive(Clone)]
pub struct BluestBackend {
    adapter: Adapter,
    scanner: ScaleScanner,
    notification_buffer: usize,
}

impl BluestBackend {
    /// Waits for the default adapter to become available.
    pub async fn new(config: &ScaleConfig) -> Result<Self, ConnectionError> {
        let adapter = Adapter::default()
            .await
            .ok_or(ConnectionError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let scanner = ScaleScanner::new(
            adapter.clone(),
            Duration::from_secs(config.discovery_timeout_secs),
            config.min_rssi,
        );
        Ok(Self {
            adapter,
            scanner,
            notification_buffer: config.notification_buffer,
        })
    }
}

#[async_trait::async_trait]
impl ScaleBackend for BluestBackend {
    type Device = Device;
    type Characteristic = Characteristic;

    async fn request_device(
        &self,
        filter: &DiscoveryFilter,
        cancel: &CancellationToken,
    ) -> Result<Device, ConnectionError> {
        self.scanner.select(filter, cancel).await
    }

    fn describe(&self, device: &Device) -> ScaleDevice {
        let id = device.id().to_string();
        ScaleDevice {
            address: extract_mac_address(&id),
            name: device.name().ok(),
            id,
        }
    }

    async fn watch_disconnect(
        &self,
        device: &Device,
    ) -> Result<oneshot::Receiver<()>, ConnectionError> {
        notification::watch_connection(self.adapter.clone(), device.clone()).await
    }

    async fn open_gatt(&self, device: &Device) -> Result<(), ConnectionError> {
        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            self.adapter.connect_device(device).await?;
        }
        Ok(())
    }

    async fn find_characteristic(
        &self,
        device: &Device,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<Characteristic>, ConnectionError> {
        info!("Connection successful, discovering services...");
        let Some(scale_service) = device
            .discover_services_with_uuid(service)
            .await?
            .into_iter()
            .next()
        else {
            for available in device.services().await.unwrap_or_default() {
                info!("Available service: {}", available.uuid());
            }
            warn!("Scale service not found: {}", service);
            return Ok(None);
        };
        info!("Found scale service: {}", scale_service.uuid());

        let weight_char = scale_service
            .discover_characteristics_with_uuid(characteristic)
            .await?
            .into_iter()
            .next();
        match &weight_char {
            Some(found) => info!("Found weight characteristic: {}", found.uuid()),
            None => warn!("Weight characteristic not found: {}", characteristic),
        }
        Ok(weight_char)
    }

    async fn supports_notify(&self, characteristic: &Characteristic) -> Result<bool, ConnectionError> {
        Ok(characteristic.properties().await?.notify)
    }

    async fn subscribe(
        &self,
        characteristic: Characteristic,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
        notification::forward_notifications(characteristic, self.notification_buffer).await
    }

    async fn close_gatt(&self, device: &Device) -> Result<(), ConnectionError> {
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter.disconnect_device(device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }
}
