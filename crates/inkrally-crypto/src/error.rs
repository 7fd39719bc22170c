use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed: {0}")]
    EncryptionError(String),

    #[error("decryption failed: {0}")]
    DecryptionError(String),

    #[error("key wrap failed: {0}")]
    KeyWrap(String),

    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}
