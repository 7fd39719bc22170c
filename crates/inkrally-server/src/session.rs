//! Per-connection lifecycle: handshake, serialized writer task, serial read
//! loop, dispatch, detach on exit.

use std::net::SocketAddr;
use std::sync::Arc;

use inkrally_crypto::{HandshakeKeys, SessionKey};
use inkrally_protocol::{codec, frame, Request};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::handlers;
use crate::server_state::ServerState;

/// Identity bound to a connection by a successful `login`.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: i64,
    pub username: String,
}

/// Per-connection context threaded through the dispatcher.
pub struct ConnContext {
    pub session_id: u64,
    /// Plaintext-frame queue feeding the connection's writer task.
    pub tx: mpsc::UnboundedSender<Vec<u8>>,
    pub authed: Option<AuthedUser>,
}

/// Drive one accepted connection to completion.
pub async fn run_connection(
    state: Arc<ServerState>,
    keys: Arc<HandshakeKeys>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let (mut reader, mut writer) = stream.into_split();

    // Handshake failure closes the socket without a reply.
    let key = match perform_handshake(&keys, &mut reader, &mut writer).await {
        Ok(key) => Arc::new(key),
        Err(e) => {
            tracing::debug!(%addr, error = %e, "handshake failed");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    // The writer task owns the write half. Queued frames are sealed and
    // written one at a time, so concurrent pushes can never interleave
    // partial writes on the socket.
    let writer_key = Arc::clone(&key);
    let writer_task = tokio::spawn(async move {
        while let Some(plain) = rx.recv().await {
            let sealed = match codec::seal_bytes(&writer_key, &plain) {
                Ok(sealed) => sealed,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to seal outgoing frame");
                    continue;
                }
            };
            if let Err(e) = frame::write_frame(&mut writer, &sealed).await {
                tracing::debug!(error = %e, "write failed, stopping connection writer");
                break;
            }
        }
    });

    let mut conn = ConnContext {
        session_id: state.registry.next_session_id(),
        tx,
        authed: None,
    };
    tracing::debug!(%addr, session = conn.session_id, "session established");

    loop {
        let body = match frame::read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "frame read failed");
                break;
            }
        };
        let request: Request = match codec::open(&key, &body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "undecodable frame, closing connection");
                break;
            }
        };
        if let Some(response) = handlers::dispatch(&state, &mut conn, request) {
            let plain = serde_json::to_vec(&response).unwrap_or_default();
            if conn.tx.send(plain).is_err() {
                break;
            }
        }
    }

    if let Some(user) = &conn.authed {
        state.registry.detach(user.user_id, conn.session_id);
        tracing::info!(user = %user.username, "session closed");
    }
    // Dropping the context drops the last queue sender once the registry
    // entry is gone, which lets the writer drain and exit.
    drop(conn);
    let _ = writer_task.await;
}

/// Send the PEM anchor, read back the wrapped session key, unwrap it.
async fn perform_handshake<R, W>(
    keys: &HandshakeKeys,
    reader: &mut R,
    writer: &mut W,
) -> Result<SessionKey, String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    frame::write_frame(writer, keys.public_key_pem().as_bytes())
        .await
        .map_err(|e| format!("failed to publish handshake key: {e}"))?;

    let wrapped = frame::read_frame(reader)
        .await
        .map_err(|e| format!("failed to read wrapped key: {e}"))?
        .ok_or_else(|| "peer closed during handshake".to_string())?;

    keys.unwrap_session_key(&wrapped).map_err(|e| e.to_string())
}
