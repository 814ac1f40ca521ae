//! Core functionality for the refill kiosk
//! Scale connectivity and the refill flow that consumes its readings.

pub mod refill;
pub mod scale;

// Re-export commonly used types
pub use refill::{RefillHandle, RefillSnapshot, RefillStep};
pub use scale::{ScaleConnection, ScaleLink};
