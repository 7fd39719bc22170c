use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed mid-frame")]
    Truncated,

    #[error("frame of {0} bytes exceeds the frame size limit")]
    Oversize(usize),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("seal failed: {0}")]
    Seal(String),

    #[error("open failed: {0}")]
    Open(String),
}
