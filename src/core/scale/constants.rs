//! Constants used throughout the scale link
//! UUIDs, payload layout and default timings for the refill scale.

use uuid::Uuid;

/// Name shown when the scale does not report one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// The UUID of the weighing service exposed by the scale
pub const UUID_SCALE_SERVICE: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// The UUID of the notifiable weight characteristic
pub const UUID_SCALE_WEIGHT_CHAR: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

/// First byte of the big-endian centigram field in a weight notification
pub const WEIGHT_FIELD_START: usize = 8;

/// One past the last byte of the centigram field
pub const WEIGHT_FIELD_END: usize = 14;

/// Centigrams per gram
pub const CENTIGRAMS_PER_GRAM: u64 = 100;

/// How long discovery runs before giving up, in seconds
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// Advertisements weaker than this are ignored during open discovery
pub const DEFAULT_MIN_RSSI: i16 = -90;

/// Capacity of the raw notification channel between backend and link
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 32;
