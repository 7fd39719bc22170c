//! Length-prefixed framing: every wire message is `u32 big-endian length ||
//! payload`. Reads are exact: a frame is either fully read or the connection
//! is treated as closed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Upper bound on a single frame body. A corrupt length header must not be
/// allowed to drive an unbounded allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary, and
/// [`ProtocolError::Truncated`] when the peer disappears mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated);
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        tracing::warn!(len, "oversize frame rejected");
        return Err(ProtocolError::Oversize(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(payload))
}

/// Write one frame as a single `write_all`, so concurrent writers that are
/// serialized at the call site can never interleave partial frames.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversize(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::Oversize(payload.len()))?;

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    Ok(())
}
