//! BLE backend seam
//! `ScaleLink` drives the connection lifecycle through this trait so the
//! same lifecycle runs against bluest or a scripted test double.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::scale::error::ConnectionError;
use crate::core::scale::types::{DiscoveryFilter, ScaleDevice};

/// The BLE operations a scale link needs
#[async_trait::async_trait]
pub trait ScaleBackend: Send + Sync + 'static {
    /// Handle to a selected device
    type Device: Clone + Send + Sync + 'static;
    /// Handle to a resolved GATT characteristic
    type Characteristic: Send + Sync + 'static;

    /// Discover and select a device matching `filter`.
    ///
    /// Returns `SelectionCancelled` when `cancel` fires or nothing is found.
    async fn request_device(
        &self,
        filter: &DiscoveryFilter,
        cancel: &CancellationToken,
    ) -> Result<Self::Device, ConnectionError>;

    /// Identity of a selected device
    fn describe(&self, device: &Self::Device) -> ScaleDevice;

    /// Register for lower-layer disconnects. The receiver resolves once when
    /// the device drops off; a dropped sender counts as a disconnect too.
    async fn watch_disconnect(
        &self,
        device: &Self::Device,
    ) -> Result<oneshot::Receiver<()>, ConnectionError>;

    /// Open the GATT link
    async fn open_gatt(&self, device: &Self::Device) -> Result<(), ConnectionError>;

    /// Resolve a characteristic inside a service. `None` if either is absent.
    async fn find_characteristic(
        &self,
        device: &Self::Device,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<Self::Characteristic>, ConnectionError>;

    async fn supports_notify(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<bool, ConnectionError>;

    /// Start notifications. Raw payloads arrive on the returned channel
    /// until it is dropped or the device goes away. The link treats the end
    /// of the stream as a disconnect.
    async fn subscribe(
        &self,
        characteristic: Self::Characteristic,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError>;

    /// Close the GATT link if it is open
    async fn close_gatt(&self, device: &Self::Device) -> Result<(), ConnectionError>;
}
