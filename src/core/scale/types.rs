//! Defines shared data structures for the scale link.

use serde::Serialize;
use uuid::Uuid;

use crate::core::scale::error::ConnectionError;

/// Identity of a selected scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleDevice {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// MAC address, when the platform id carries one
    pub address: Option<String>,
}

/// Lifecycle of the scale link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// A failed attempt is being torn down; always followed by `Disconnected`.
    Error,
}

/// The link as seen by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleConnection {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub address: Option<String>,
    pub state: LinkState,
    pub last_error: Option<ConnectionError>,
}

impl ScaleConnection {
    pub fn disconnected(last_error: Option<ConnectionError>) -> Self {
        Self {
            device_id: None,
            device_name: None,
            address: None,
            state: LinkState::Disconnected,
            last_error,
        }
    }

    pub fn connecting() -> Self {
        Self {
            state: LinkState::Connecting,
            ..Self::disconnected(None)
        }
    }

    pub fn failed(error: ConnectionError) -> Self {
        Self {
            state: LinkState::Error,
            ..Self::disconnected(Some(error))
        }
    }

    pub fn connected(device: ScaleDevice, display_name: String) -> Self {
        Self {
            device_id: Some(device.id),
            device_name: Some(display_name),
            address: device.address,
            state: LinkState::Connected,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == LinkState::Connecting
    }
}

impl Default for ScaleConnection {
    fn default() -> Self {
        Self::disconnected(None)
    }
}

/// Which devices discovery may select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Previously paired name; when set only this name is accepted
    pub name: Option<String>,
    /// Service a device must advertise during open discovery
    pub service: Uuid,
}

impl DiscoveryFilter {
    /// Builds a filter from an optional paired name. An empty name means
    /// open discovery.
    pub fn new(preferred_name: Option<&str>, service: Uuid) -> Self {
        let name = preferred_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        Self { name, service }
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    /// Returns true if an advertisement with this name and service list is
    /// acceptable.
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        match &self.name {
            Some(wanted) => name == Some(wanted.as_str()),
            None => services.contains(&self.service),
        }
    }
}
