use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::db::Db;
use crate::mailer::MailSender;
use crate::registry::SessionRegistry;

/// A password-reset code issued to a username. Held only in process memory,
/// overwritten on re-issue, consumed on successful reset.
pub struct PendingCode {
    pub code: String,
    pub issued_at: Instant,
}

/// Central state shared by every connection.
pub struct ServerState {
    /// The server's `SQLite` database.
    pub db: Db,
    /// Online sessions, `user_id` -> send handle.
    pub registry: SessionRegistry,
    /// Pending password-reset codes, `username` -> code.
    pub codes: Mutex<HashMap<String, PendingCode>>,
    /// Verification-code delivery seam.
    pub mailer: Arc<dyn MailSender>,
    /// Directory holding avatar blobs.
    pub avatar_dir: PathBuf,
}

impl ServerState {
    pub fn new(db: Db, mailer: Arc<dyn MailSender>, avatar_dir: PathBuf) -> Self {
        Self {
            db,
            registry: SessionRegistry::new(),
            codes: Mutex::new(HashMap::new()),
            mailer,
            avatar_dir,
        }
    }
}
