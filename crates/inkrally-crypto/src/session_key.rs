use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Length of the raw session key in bytes (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Per-connection symmetric key negotiated during the handshake.
///
/// Every frame body on the wire is `[12-byte nonce || AES-256-GCM ciphertext]`
/// under this key. The client generates the key and wraps it under the
/// server's published RSA key; see [`crate::handshake`].
#[derive(ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    /// Generate a new random session key (client side of the handshake).
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Restore a session key from raw bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Raw key bytes (for RSA wrapping during the handshake).
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.key
    }

    /// Encrypt a plaintext frame body.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;

        // Prepend nonce to ciphertext
        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypt a frame body (expects nonce prepended).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionError("data too short".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))?;

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let ciphertext = &data[NONCE_LEN..];

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionError(e.to_string()))
    }
}
