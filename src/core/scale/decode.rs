//! Scale notification decoding
//! Turns a raw weight notification into whole grams.
//!
//! The scale pushes a fixed-layout frame. Bytes 8..14 (hex digits 16..28 of
//! the hex-encoded frame) carry an unsigned big-endian centigram count.

use log::debug;

use crate::core::scale::constants::{CENTIGRAMS_PER_GRAM, WEIGHT_FIELD_END, WEIGHT_FIELD_START};
use crate::core::scale::error::DecodeError;

/// Reads the raw centigram field from a notification payload.
pub fn decode_centigrams(payload: &[u8]) -> Result<u64, DecodeError> {
    let field = payload
        .get(WEIGHT_FIELD_START..WEIGHT_FIELD_END)
        .ok_or(DecodeError::Truncated { len: payload.len() })?;

    // Leading zero bytes contribute nothing, so an all-zero field is 0.
    Ok(field
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

/// Decodes a notification into grams, rounding half up.
pub fn decode_weight(payload: &[u8]) -> Result<u32, DecodeError> {
    let centigrams = decode_centigrams(payload)?;
    let grams = (centigrams + CENTIGRAMS_PER_GRAM / 2) / CENTIGRAMS_PER_GRAM;
    u32::try_from(grams).map_err(|_| DecodeError::OutOfRange { centigrams })
}

/// Notification-path decode: a garbled frame reads as zero grams.
pub fn weight_or_zero(payload: &[u8]) -> u32 {
    match decode_weight(payload) {
        Ok(grams) => grams,
        Err(e) => {
            debug!("Discarding scale frame {:02x?}: {}", payload, e);
            0
        }
    }
}
