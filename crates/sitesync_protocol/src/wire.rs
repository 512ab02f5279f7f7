//! CBOR wire codec.
//!
//! Every message and journal frame body in SiteSync is CBOR, produced and
//! consumed through serde. The helpers here exist so the generic ciborium
//! error types never leak across crate boundaries.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Result alias for wire codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors from encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum WireError {
    /// Value could not be encoded.
    #[error("wire encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the expected type.
    #[error("wire decode failed: {0}")]
    Decode(String),
}

/// Encodes a value as CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> WireResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into a value.
///
/// Trailing bytes after the first complete value are rejected by ciborium,
/// so a decode cannot silently swallow a concatenated second message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> WireResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
