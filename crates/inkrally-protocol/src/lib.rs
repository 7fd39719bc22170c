pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use error::ProtocolError;
pub use message::{Push, Request, Response, Status};
