//! Sealed-JSON codec: serde_json plaintext under the per-connection
//! [`SessionKey`]. The sealed bytes are what [`crate::frame`] carries.

use inkrally_crypto::SessionKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Serialize a message and encrypt it under the session key.
pub fn seal<T: Serialize>(key: &SessionKey, msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg).map_err(|e| ProtocolError::Seal(e.to_string()))?;
    key.encrypt(&json)
        .map_err(|e| ProtocolError::Seal(e.to_string()))
}

/// Encrypt already-serialized JSON bytes under the session key.
///
/// The per-connection writer task uses this: the registry hands it plaintext
/// frames that were serialized once for a whole fan-out.
pub fn seal_bytes(key: &SessionKey, json: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    key.encrypt(json)
        .map_err(|e| ProtocolError::Seal(e.to_string()))
}

/// Decrypt a frame body and parse it as `T`.
pub fn open<T: DeserializeOwned>(key: &SessionKey, sealed: &[u8]) -> Result<T, ProtocolError> {
    let json = key
        .decrypt(sealed)
        .map_err(|e| ProtocolError::Open(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| ProtocolError::Open(e.to_string()))
}
