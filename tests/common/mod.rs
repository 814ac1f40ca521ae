//! Scripted scale backend shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use refill_kiosk_lib::core::scale::{ConnectionError, DiscoveryFilter, ScaleBackend, ScaleDevice};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const SCALE_ID: &str = "hci0/dev_D6_40_66_AB_12_44";
pub const SCALE_NAME: &str = "HOTO-Scale";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    pub id: String,
    pub name: Option<String>,
}

impl MockDevice {
    pub fn scale() -> Self {
        Self {
            id: SCALE_ID.into(),
            name: Some(SCALE_NAME.into()),
        }
    }
}

/// What the fake adapter will do on the next attempt
struct Script {
    device: Option<MockDevice>,
    has_characteristic: bool,
    notify: bool,
    gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct Calls {
    filters: Vec<DiscoveryFilter>,
    opens: usize,
    closes: usize,
}

struct Inner {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
    frames: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    lost: Mutex<Option<oneshot::Sender<()>>>,
}

/// Test double for the BLE adapter. Clones share the same script, so the
/// test keeps one clone to drive the copy owned by the link.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script {
                    device: Some(MockDevice::scale()),
                    has_characteristic: true,
                    notify: true,
                    gate: None,
                }),
                calls: Mutex::new(Calls::default()),
                frames: Mutex::new(None),
                lost: Mutex::new(None),
            }),
        }
    }

    pub fn set_device(&self, device: Option<MockDevice>) {
        self.inner.script.lock().unwrap().device = device;
    }

    pub fn set_has_characteristic(&self, present: bool) {
        self.inner.script.lock().unwrap().has_characteristic = present;
    }

    pub fn set_notify(&self, notify: bool) {
        self.inner.script.lock().unwrap().notify = notify;
    }

    /// Holds discovery until the returned gate is notified or the attempt
    /// is cancelled.
    pub fn gate_discovery(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.script.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    pub fn filters(&self) -> Vec<DiscoveryFilter> {
        self.inner.calls.lock().unwrap().filters.clone()
    }

    pub fn opens(&self) -> usize {
        self.inner.calls.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.inner.calls.lock().unwrap().closes
    }

    /// Pushes a raw notification payload.
    pub async fn send_payload(&self, payload: Vec<u8>) {
        let sender = self.inner.frames.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(payload).await;
        }
    }

    /// Pushes a well-formed weight frame.
    pub async fn send_grams(&self, grams: u32) {
        self.send_payload(weight_frame(u64::from(grams) * 100)).await;
    }

    /// Ends the notification stream without a disconnect event.
    pub fn end_stream(&self) {
        self.inner.frames.lock().unwrap().take();
    }

    /// Drops the disconnect watch without signalling it.
    pub fn abandon_watch(&self) {
        self.inner.lost.lock().unwrap().take();
    }

    /// Simulates the scale dropping off.
    pub fn drop_link(&self) {
        if let Some(lost) = self.inner.lost.lock().unwrap().take() {
            let _ = lost.send(());
        }
    }
}

/// A notification frame carrying `centigrams` in bytes 8..14.
pub fn weight_frame(centigrams: u64) -> Vec<u8> {
    let mut frame = vec![0xAC, 0x02, 0xFF, 0x10, 0x00, 0x01, 0x7E, 0x33];
    frame.extend_from_slice(&centigrams.to_be_bytes()[2..]);
    frame.extend_from_slice(&[0x00, 0x5A]);
    frame
}

#[async_trait]
impl ScaleBackend for MockBackend {
    type Device = MockDevice;
    type Characteristic = ();

    async fn request_device(
        &self,
        filter: &DiscoveryFilter,
        cancel: &CancellationToken,
    ) -> Result<MockDevice, ConnectionError> {
        self.inner.calls.lock().unwrap().filters.push(filter.clone());
        let (device, gate) = {
            let script = self.inner.script.lock().unwrap();
            (script.device.clone(), script.gate.clone())
        };

        if let Some(gate) = gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::SelectionCancelled),
                _ = gate.notified() => {}
            }
        }

        match device {
            Some(device) if filter.name.is_none() || filter.name == device.name => Ok(device),
            _ => Err(ConnectionError::SelectionCancelled),
        }
    }

    fn describe(&self, device: &MockDevice) -> ScaleDevice {
        ScaleDevice {
            id: device.id.clone(),
            name: device.name.clone(),
            address: Some("D6:40:66:AB:12:44".into()),
        }
    }

    async fn watch_disconnect(
        &self,
        _device: &MockDevice,
    ) -> Result<oneshot::Receiver<()>, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        *self.inner.lost.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn open_gatt(&self, _device: &MockDevice) -> Result<(), ConnectionError> {
        self.inner.calls.lock().unwrap().opens += 1;
        Ok(())
    }

    async fn find_characteristic(
        &self,
        _device: &MockDevice,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<Option<()>, ConnectionError> {
        let present = self.inner.script.lock().unwrap().has_characteristic;
        Ok(present.then_some(()))
    }

    async fn supports_notify(&self, _characteristic: &()) -> Result<bool, ConnectionError> {
        Ok(self.inner.script.lock().unwrap().notify)
    }

    async fn subscribe(&self, _characteristic: ()) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
        let (tx, rx) = mpsc::channel(32);
        *self.inner.frames.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn close_gatt(&self, _device: &MockDevice) -> Result<(), ConnectionError> {
        self.inner.calls.lock().unwrap().closes += 1;
        self.inner.frames.lock().unwrap().take();
        Ok(())
    }
}
