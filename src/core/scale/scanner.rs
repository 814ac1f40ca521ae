//! Scale discovery on top of bluest.

use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::scale::error::ConnectionError;
use crate::core::scale::types::DiscoveryFilter;

#[derive(Clone)]
pub struct ScaleScanner {
    adapter: Adapter,
    timeout: Duration,
    min_rssi: Option<i16>,
}

impl ScaleScanner {
    pub fn new(adapter: Adapter, timeout: Duration, min_rssi: Option<i16>) -> Self {
        Self {
            adapter,
            timeout,
            min_rssi,
        }
    }

    /// Picks the first device accepted by `filter`, preferring one that is
    /// already connected to the host.
    pub async fn select(
        &self,
        filter: &DiscoveryFilter,
        cancel: &CancellationToken,
    ) -> Result<Device, ConnectionError> {
        if let Some(device) = self.find_connected(filter).await? {
            info!("Using already connected scale {:?}", device.name().ok());
            return Ok(device);
        }
        info!("No connected scale detected");

        info!("Starting bluetooth scan");
        let mut scan_stream = self.adapter.scan(&[]).await?;
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scale selection cancelled.");
                    return Err(ConnectionError::SelectionCancelled);
                }
                _ = &mut deadline => {
                    info!("No matching scale found within {:?}.", self.timeout);
                    return Err(ConnectionError::SelectionCancelled);
                }
                result = scan_stream.next() => {
                    let Some(discovered) = result else {
                        info!("Bluetooth scan stream has ended.");
                        return Err(ConnectionError::SelectionCancelled);
                    };
                    debug!(
                        "Found device - Device: {:?}, RSSI: {:?}",
                        discovered.device, discovered.rssi
                    );
                    let name = discovered
                        .adv_data
                        .local_name
                        .clone()
                        .or_else(|| discovered.device.name().ok());
                    // A paired scale is accepted at any signal strength.
                    let in_range = filter.is_named() || self.in_range(discovered.rssi);
                    if in_range && filter.matches(name.as_deref(), &discovered.adv_data.services) {
                        info!("Selected scale {:?} (RSSI {:?})", name, discovered.rssi);
                        return Ok(discovered.device);
                    }
                }
            }
        }
    }

    async fn find_connected(
        &self,
        filter: &DiscoveryFilter,
    ) -> Result<Option<Device>, ConnectionError> {
        info!("Checking for connected scales");
        let connected = self
            .adapter
            .connected_devices_with_services(&[filter.service])
            .await?;
        Ok(connected.into_iter().find(|device| {
            filter.matches(device.name().ok().as_deref(), &[filter.service])
        }))
    }

    fn in_range(&self, rssi: Option<i16>) -> bool {
        match (self.min_rssi, rssi) {
            (Some(floor), Some(signal)) => signal >= floor,
            _ => true,
        }
    }
}

/// Pulls a MAC address out of a platform device id, if it carries one.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}
