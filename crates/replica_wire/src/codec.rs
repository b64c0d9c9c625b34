//! JSON codec helpers.
//!
//! Thin wrappers around `serde_json` for encoding and decoding log payloads.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Encode a value to JSON bytes.
///
/// # Errors
///
/// Returns [`WireError::Json`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(value).map_err(WireError::Json)
}

/// Decode a value from JSON bytes.
///
/// # Errors
///
/// Returns [`WireError::Json`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WireError> {
    serde_json::from_slice(bytes).map_err(WireError::Json)
}
