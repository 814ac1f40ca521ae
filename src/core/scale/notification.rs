//! Notification and connection-event forwarding for the bluest backend
//! bluest streams borrow their characteristic/adapter, so each one is driven
//! by a spawned task that owns the handle and forwards into a channel.

use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::core::scale::error::ConnectionError;

/// Starts notifications on `characteristic` and forwards every payload.
///
/// Resolves once the subscription is active. The forwarding task exits when
/// the receiver is dropped or the stream ends.
pub async fn forward_notifications(
    characteristic: Characteristic,
    buffer: usize,
) -> Result<mpsc::Receiver<Vec<u8>>, ConnectionError> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = ready_tx.send(Err(ConnectionError::from(e)));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                item = notification_stream.next() => match item {
                    Some(Ok(value)) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
        info!("Notification forwarding for {} stopped", characteristic.uuid());
    });

    ready_rx
        .await
        .map_err(|_| ConnectionError::Bluetooth("notification task exited".to_string()))??;
    Ok(rx)
}

/// Watches the device's connection events.
///
/// Resolves once the watch is registered. The receiver fires on disconnect
/// and errors if the event stream ends, so either way the link is torn down.
pub async fn watch_connection(
    adapter: Adapter,
    device: Device,
) -> Result<oneshot::Receiver<()>, ConnectionError> {
    let (mut lost_tx, lost_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut events = match adapter.device_connection_events(&device).await {
            Ok(events) => {
                let _ = ready_tx.send(Ok(()));
                events
            }
            Err(e) => {
                warn!("Cannot watch connection events for {}: {}", device.id(), e);
                let _ = ready_tx.send(Err(ConnectionError::from(e)));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = lost_tx.closed() => return,
                event = events.next() => match event {
                    Some(ConnectionEvent::Disconnected) => break,
                    Some(ConnectionEvent::Connected) => {
                        debug!("Device {} reported connected", device.id());
                    }
                    None => {
                        warn!("Connection events for {} ended", device.id());
                        return;
                    }
                }
            }
        }

        info!("Device {} lost connection", device.id());
        let _ = lost_tx.send(());
    });

    ready_rx
        .await
        .map_err(|_| ConnectionError::Bluetooth("connection watch exited".to_string()))??;
    Ok(lost_rx)
}
