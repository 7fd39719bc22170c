pub mod error;
pub mod handshake;
pub mod session_key;

pub use error::CryptoError;
pub use handshake::{wrap_session_key, HandshakeKeys};
pub use session_key::SessionKey;
