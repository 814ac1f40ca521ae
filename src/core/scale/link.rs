//! Scale link
//! Owns the connection to the scale and publishes its weight and status.
//!
//! `ScaleLink` is the single owner of the device handle. Consumers only get
//! read-only projections: the latest weight in grams and the connection
//! record, either by value or as `watch` receivers through [`ScaleLink::feed`].
//!
//! Every connection attempt gets an epoch. Background tasks belonging to an
//! older epoch never touch the published state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::scale_config::ScaleConfig;
use crate::core::scale::backend::ScaleBackend;
use crate::core::scale::constants::UNKNOWN_DEVICE_NAME;
use crate::core::scale::decode;
use crate::core::scale::error::ConnectionError;
use crate::core::scale::types::{DiscoveryFilter, ScaleConnection};

/// Read-only view of the link handed to the refill state machine
#[derive(Debug, Clone)]
pub struct ScaleFeed {
    /// Latest weight in whole grams; zero while disconnected
    pub weight: watch::Receiver<u32>,
    pub connection: watch::Receiver<ScaleConnection>,
}

/// Handle to the scale link. Clones share the same connection.
pub struct ScaleLink<B: ScaleBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: ScaleBackend> Clone for ScaleLink<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<B: ScaleBackend> {
    backend: B,
    config: ScaleConfig,
    /// The device we are bound to, if any
    active: Mutex<Option<ActiveLink<B::Device>>>,
    /// Set while a connect attempt is in flight
    connecting: AtomicBool,
    epoch: AtomicU64,
    /// Cancels the discovery of the in-flight attempt
    selection: Mutex<Option<CancellationToken>>,
    connection_tx: watch::Sender<ScaleConnection>,
    weight_tx: watch::Sender<u32>,
}

struct ActiveLink<D> {
    device: D,
    epoch: u64,
    /// Stops the notification pump and the disconnect watcher
    tasks: CancellationToken,
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<B: ScaleBackend> ScaleLink<B> {
    pub fn new(backend: B, config: ScaleConfig) -> Self {
        let (connection_tx, _) = watch::channel(ScaleConnection::default());
        let (weight_tx, _) = watch::channel(0u32);
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                active: Mutex::new(None),
                connecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                selection: Mutex::new(None),
                connection_tx,
                weight_tx,
            }),
        }
    }

    /// Connects to a scale.
    ///
    /// With `preferred_name` discovery only accepts that name; otherwise any
    /// device advertising the scale service is accepted. On failure the link
    /// is left `Disconnected` with `last_error` set.
    pub async fn connect(
        &self,
        preferred_name: Option<&str>,
    ) -> Result<ScaleConnection, ConnectionError> {
        let Some(_guard) = ConnectGuard::acquire(&self.shared.connecting) else {
            warn!("Connect requested while another attempt is in flight.");
            return Err(ConnectionError::InProgress);
        };

        if self.is_connected() {
            info!("Scale already connected.");
            return Ok(self.connection());
        }

        let filter = DiscoveryFilter::new(preferred_name, self.shared.config.service_uuid);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *self.shared.selection.lock().await = Some(cancel.clone());

        self.publish_weight(0);
        self.publish_connection(ScaleConnection::connecting());

        let result = self.establish(&filter, &cancel, epoch).await;
        self.shared.selection.lock().await.take();

        match result {
            Ok(connection) => {
                info!(
                    "Scale {:?} connected (epoch {}).",
                    connection.device_name, epoch
                );
                Ok(connection)
            }
            Err(e) => {
                warn!("Scale connection failed [{}]: {}", e.code(), e);
                self.publish_connection(ScaleConnection::failed(e.clone()));
                self.publish_weight(0);
                self.publish_connection(ScaleConnection::disconnected(Some(e.clone())));
                Err(e)
            }
        }
    }

    /// Drops the link. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_selection().await;
        self.teardown(None, None).await;
    }

    /// Aborts the discovery of an in-flight connect attempt.
    pub async fn cancel_selection(&self) {
        if let Some(cancel) = self.shared.selection.lock().await.as_ref() {
            info!("Cancelling scale selection.");
            cancel.cancel();
        }
    }

    /// Latest weight in grams
    pub fn weight(&self) -> u32 {
        *self.shared.weight_tx.borrow()
    }

    pub fn connection(&self) -> ScaleConnection {
        self.shared.connection_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection_tx.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.connection_tx.borrow().is_connecting()
    }

    pub fn device_name(&self) -> Option<String> {
        self.shared.connection_tx.borrow().device_name.clone()
    }

    pub fn feed(&self) -> ScaleFeed {
        ScaleFeed {
            weight: self.shared.weight_tx.subscribe(),
            connection: self.shared.connection_tx.subscribe(),
        }
    }

    /// Select, bind and subscribe. Closes the GATT link again if binding fails.
    async fn establish(
        &self,
        filter: &DiscoveryFilter,
        cancel: &CancellationToken,
        epoch: u64,
    ) -> Result<ScaleConnection, ConnectionError> {
        let backend = &self.shared.backend;
        match &filter.name {
            Some(name) => info!("Requesting paired scale {:?}...", name),
            None => info!("Requesting any scale advertising {}...", filter.service),
        }

        let device = backend.request_device(filter, cancel).await?;
        let identity = backend.describe(&device);
        let display_name = identity
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        info!("Device details - ID: {}, Name: {}", identity.id, display_name);

        let (lost, frames) = match self.bind(&device).await {
            Ok(bound) => bound,
            Err(e) => {
                self.close_quietly(&device).await;
                return Err(e);
            }
        };

        let tasks = CancellationToken::new();
        let mut active = self.shared.active.lock().await;
        if self.shared.epoch.load(Ordering::SeqCst) != epoch {
            drop(active);
            info!("Connect attempt {} was superseded, releasing device.", epoch);
            self.close_quietly(&device).await;
            return Err(ConnectionError::SelectionCancelled);
        }
        *active = Some(ActiveLink {
            device,
            epoch,
            tasks: tasks.clone(),
        });

        // Published under the lock so a racing teardown always lands last.
        let connection = ScaleConnection::connected(identity, display_name);
        self.publish_connection(connection.clone());
        self.spawn_weight_pump(frames, epoch, tasks.clone());
        self.spawn_disconnect_watch(lost, epoch, tasks);
        drop(active);
        Ok(connection)
    }

    async fn bind(
        &self,
        device: &B::Device,
    ) -> Result<(oneshot::Receiver<()>, mpsc::Receiver<Vec<u8>>), ConnectionError> {
        let backend = &self.shared.backend;
        let config = &self.shared.config;

        // Registered before the link opens so an early drop is not missed.
        let lost = backend.watch_disconnect(device).await?;

        info!("Opening GATT link...");
        backend.open_gatt(device).await?;

        let characteristic = backend
            .find_characteristic(device, config.service_uuid, config.characteristic_uuid)
            .await?
            .ok_or(ConnectionError::UnsupportedDevice)?;

        if !backend.supports_notify(&characteristic).await? {
            return Err(ConnectionError::NotificationsUnsupported);
        }

        info!("Subscribing to weight notifications...");
        let frames = backend.subscribe(characteristic).await?;
        Ok((lost, frames))
    }

    fn spawn_weight_pump(
        &self,
        mut frames: mpsc::Receiver<Vec<u8>>,
        epoch: u64,
        tasks: CancellationToken,
    ) {
        let link = self.clone();
        tokio::spawn(async move {
            info!("Listening for scale notifications...");
            loop {
                tokio::select! {
                    biased;
                    _ = tasks.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(payload) => {
                            let grams = decode::weight_or_zero(&payload);
                            debug!("Scale frame {:02x?} -> {} g", payload, grams);
                            // Checked under the watch lock so a frame racing a
                            // teardown cannot overwrite the zeroed weight.
                            link.shared.weight_tx.send_if_modified(|current| {
                                if tasks.is_cancelled() || *current == grams {
                                    return false;
                                }
                                *current = grams;
                                true
                            });
                        }
                        None => {
                            warn!("Scale notification stream ended (epoch {}).", epoch);
                            link.teardown(Some(epoch), Some(ConnectionError::DeviceDisconnected))
                                .await;
                            break;
                        }
                    }
                }
            }
            info!("Notification stream ended");
        });
    }

    fn spawn_disconnect_watch(
        &self,
        lost: oneshot::Receiver<()>,
        epoch: u64,
        tasks: CancellationToken,
    ) {
        let link = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = tasks.cancelled() => {}
                signal = lost => {
                    match signal {
                        Ok(()) => warn!("Scale dropped the link (epoch {}).", epoch),
                        Err(_) => warn!("Lost track of the scale connection (epoch {}).", epoch),
                    }
                    link.teardown(Some(epoch), Some(ConnectionError::DeviceDisconnected))
                        .await;
                }
            }
        });
    }

    /// Releases the active device and resets the published state.
    ///
    /// With `only_epoch` set the reset only happens if that epoch is still
    /// the active one.
    async fn teardown(&self, only_epoch: Option<u64>, cause: Option<ConnectionError>) {
        // Held to the end so a concurrent `establish` publishes strictly
        // before or after this reset.
        let mut active = self.shared.active.lock().await;
        if let Some(epoch) = only_epoch {
            if active.as_ref().map(|a| a.epoch) != Some(epoch) {
                debug!("Ignoring disconnect for stale epoch {}", epoch);
                return;
            }
        }

        if let Some(link) = active.take() {
            link.tasks.cancel();
            self.close_quietly(&link.device).await;
            info!("Connected state cleared, releasing device and characteristic handles.");
        }

        self.publish_weight(0);
        self.publish_connection(ScaleConnection::disconnected(cause));
    }

    async fn close_quietly(&self, device: &B::Device) {
        if let Err(e) = self.shared.backend.close_gatt(device).await {
            warn!("Failed to close GATT link: {}", e);
        }
    }

    fn publish_weight(&self, grams: u32) {
        self.shared.weight_tx.send_if_modified(|current| {
            let changed = *current != grams;
            *current = grams;
            changed
        });
    }

    fn publish_connection(&self, connection: ScaleConnection) {
        self.shared.connection_tx.send_if_modified(|current| {
            if *current == connection {
                return false;
            }
            *current = connection;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use uuid::Uuid;

    use super::*;
    use crate::core::scale::types::ScaleDevice;

    /// Always finds the scale; counts GATT closes.
    #[derive(Default)]
    struct StubBackend {
        closes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ScaleBackend for StubBackend {
        type Device = ();
        type Characteristic = ();

        async fn request_device(
            &self,
            _filter: &DiscoveryFilter,
            _cancel: &CancellationToken,
        ) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn describe(&self, _device: &()) -> ScaleDevice {
            ScaleDevice {
                id: "stub".into(),
                name: Some("Stub-Scale".into()),
                address: None,
            }
        }

        async fn watch_disconnect(
            &self,
            _device: &(),
        ) -> Result<oneshot::Receiver<()>, ConnectionError> {
            let (mut tx, rx) = oneshot::channel();
            tokio::spawn(async move { tx.closed().await });
            Ok(rx)
        }

        async fn open_gatt(&self, _device: &()) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn find_characteristic(
            &self,
            _device: &(),
            _service: Uuid,
            _characteristic: Uuid,
        ) -> Result<Option<()>, ConnectionError> {
            Ok(Some(()))
        }

        async fn supports_notify(&self, _characteristic: &()) -> Result<bool, ConnectionError> {
            Ok(true)
        }

        async fn subscribe(
            &self,
            _characteristic: (),
        ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
            // Parked until the link drops its end.
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move { tx.closed().await });
            Ok(rx)
        }

        async fn close_gatt(&self, _device: &()) -> Result<(), ConnectionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stub_link() -> ScaleLink<StubBackend> {
        ScaleLink::new(StubBackend::default(), ScaleConfig::default())
    }

    #[tokio::test]
    async fn stale_epoch_teardown_is_ignored() {
        let link = stub_link();
        link.connect(None).await.unwrap();
        let stale = link.shared.epoch.load(Ordering::SeqCst);
        link.disconnect().await;
        link.connect(None).await.unwrap();
        let closes = link.shared.backend.closes.load(Ordering::SeqCst);

        // A watcher from the first connection reporting late.
        link.teardown(Some(stale), Some(ConnectionError::DeviceDisconnected))
            .await;

        assert!(link.is_connected());
        assert_eq!(link.connection().last_error, None);
        assert_eq!(link.shared.backend.closes.load(Ordering::SeqCst), closes);
    }

    #[tokio::test]
    async fn current_epoch_teardown_resets_link() {
        let link = stub_link();
        link.connect(None).await.unwrap();
        let epoch = link.shared.epoch.load(Ordering::SeqCst);

        link.teardown(Some(epoch), Some(ConnectionError::DeviceDisconnected))
            .await;

        assert!(!link.is_connected());
        assert_eq!(
            link.connection().last_error,
            Some(ConnectionError::DeviceDisconnected)
        );
        assert_eq!(link.shared.backend.closes.load(Ordering::SeqCst), 1);
    }
}
