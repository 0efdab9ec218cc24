//! Lowercase hex codec for the `hex:hex` wire segments

use gv_core::{VaultError, VaultResult};

pub fn encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode a hex segment. Either case is accepted.
pub fn decode(segment: &str) -> VaultResult<Vec<u8>> {
    hex::decode(segment.trim())
        .map_err(|e| VaultError::MalformedPayload(format!("invalid hex segment: {e}")))
}

/// Decode a hex segment that must be exactly `N` bytes.
pub fn decode_array<const N: usize>(segment: &str) -> VaultResult<[u8; N]> {
    let bytes = decode(segment)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        VaultError::MalformedPayload(format!("expected {N} bytes, got {len}"))
    })
}
