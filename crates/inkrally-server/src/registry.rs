//! Process-wide map of online sessions.
//!
//! One lock guards the whole table. Fan-out primitives serialize the push
//! once, snapshot the target handles under the lock, and deliver after
//! releasing it, so a slow peer can never block the table. Delivery is
//! best-effort: a failed send is swallowed and the store stays
//! authoritative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use inkrally_protocol::Push;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Handle to one live connection's serialized send path.
///
/// The channel carries plaintext JSON frames; the connection's writer task
/// seals and writes them one at a time.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl SessionHandle {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    fn push_frame(&self, frame: Vec<u8>) {
        // The receiver is gone when the connection is mid-teardown; the peer
        // will resync from the store on reconnect.
        let _ = self.tx.send(frame);
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, SessionHandle>>,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind a user to a live session. A previous session for the same user
    /// is replaced silently; its socket dies on its next I/O.
    pub fn attach(&self, user_id: i64, handle: SessionHandle) {
        self.sessions.lock().insert(user_id, handle);
    }

    /// Remove the binding, but only if it still belongs to the given
    /// session. A reconnect that already replaced the entry is left alone.
    pub fn detach(&self, user_id: i64, session_id: u64) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&user_id)
            .is_some_and(|h| h.session_id == session_id)
        {
            sessions.remove(&user_id);
        }
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.sessions.lock().contains_key(&user_id)
    }

    /// Best-effort push to one user.
    pub fn send(&self, user_id: i64, push: &Push) {
        self.send_many(&[user_id], push);
    }

    /// Best-effort push to a set of users.
    pub fn send_many(&self, user_ids: &[i64], push: &Push) {
        let frame = serde_json::to_vec(push).unwrap_or_default();
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock();
            user_ids
                .iter()
                .filter_map(|id| sessions.get(id).cloned())
                .collect()
        };
        for target in targets {
            target.push_frame(frame.clone());
        }
    }

    /// Best-effort push to every online session.
    pub fn broadcast_all(&self, push: &Push) {
        let frame = serde_json::to_vec(push).unwrap_or_default();
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock();
            sessions.values().cloned().collect()
        };
        for target in targets {
            target.push_frame(frame.clone());
        }
    }
}
