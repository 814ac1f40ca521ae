//! Error types for the scale link.

use serde::Serialize;
use thiserror::Error;

/// Why a scale connection could not be established or was lost.
///
/// Every variant resolves into a `Disconnected` link; none of them is fatal
/// to the hosting process.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum ConnectionError {
    #[error("Scale selection was cancelled")]
    SelectionCancelled,
    #[error("This device is not a supported scale")]
    UnsupportedDevice,
    #[error("This device does not support notifications")]
    NotificationsUnsupported,
    #[error("The scale disconnected")]
    DeviceDisconnected,
    #[error("A connection attempt is already in progress")]
    InProgress,
    #[error("No Bluetooth adapter is available")]
    AdapterUnavailable,
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

impl ConnectionError {
    /// Stable identifier for the UI layer and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SelectionCancelled => "selection_cancelled",
            Self::UnsupportedDevice => "unsupported_device",
            Self::NotificationsUnsupported => "notifications_unsupported",
            Self::DeviceDisconnected => "device_disconnected",
            Self::InProgress => "connection_in_progress",
            Self::AdapterUnavailable => "adapter_unavailable",
            Self::Bluetooth(_) => "bluetooth_error",
        }
    }
}

#[cfg(feature = "bluest-backend")]
impl From<bluest::Error> for ConnectionError {
    fn from(e: bluest::Error) -> Self {
        Self::Bluetooth(e.to_string())
    }
}

/// A weight notification that could not be turned into grams.
///
/// Never surfaced past the link: the notification path maps it to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload of {len} bytes is too short for the weight field")]
    Truncated { len: usize },
    #[error("decoded weight of {centigrams} cg does not fit in grams")]
    OutOfRange { centigrams: u64 },
}
