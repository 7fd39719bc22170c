use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::session_key::{SessionKey, SESSION_KEY_LEN};

const RSA_BITS: usize = 2048;

/// Server-side handshake keypair, generated once per process start.
///
/// The handshake anchors on the public key alone: the server publishes it as
/// a plaintext PEM frame, the client answers with an OAEP-wrapped 32-byte
/// AES key, and everything after that is [`SessionKey`] traffic. There is no
/// long-term certificate store.
pub struct HandshakeKeys {
    private_key: RsaPrivateKey,
    public_pem: String,
}

impl HandshakeKeys {
    /// Generate a fresh RSA-2048 keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        tracing::info!("generated RSA-{RSA_BITS} handshake keypair");
        Ok(Self {
            private_key,
            public_pem,
        })
    }

    /// PEM-encoded SPKI public key, sent to every client on accept.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Unwrap the client's OAEP(SHA-256)-wrapped session key.
    ///
    /// Anything that does not decrypt to exactly 32 bytes is rejected.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SessionKey, CryptoError> {
        let raw = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| CryptoError::KeyUnwrap(e.to_string()))?;
        let key: [u8; SESSION_KEY_LEN] = raw
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("session key must be 32 bytes".into()))?;
        Ok(SessionKey::from_bytes(key))
    }
}

/// Client side of the handshake: wrap a session key under the server's
/// published PEM public key.
pub fn wrap_session_key(public_pem: &str, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let public = RsaPublicKey::from_public_key_pem(public_pem)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let mut rng = rand::thread_rng();
    public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| CryptoError::KeyWrap(e.to_string()))
}
