//! Scale link for the refill kiosk
//! This module handles discovering the Bluetooth scale, binding its weight
//! characteristic, decoding notifications and recovering from disconnects.

mod backend;
#[cfg(feature = "bluest-backend")]
mod connection;
mod constants;
pub mod decode;
mod error;
mod link;
#[cfg(feature = "bluest-backend")]
mod notification;
#[cfg(feature = "bluest-backend")]
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use backend::ScaleBackend;
#[cfg(feature = "bluest-backend")]
pub use connection::BluestBackend;
pub use constants::*; // Re-export all constants
pub use error::{ConnectionError, DecodeError};
pub use link::{ScaleFeed, ScaleLink};
#[cfg(feature = "bluest-backend")]
pub use scanner::{ScaleScanner, extract_mac_address};
pub use types::{DiscoveryFilter, LinkState, ScaleConnection, ScaleDevice};
