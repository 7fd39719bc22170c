use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::store::StoreError;

/// Shared handle to the server `SQLite` database.
pub type Db = Arc<Mutex<Connection>>;

/// Schema version. Bump when the schema changes.
const SCHEMA_VERSION: i64 = 1;

/// Open (or create) the database file and run migrations.
pub fn open(path: &str) -> Result<Db, StoreError> {
    let conn = Connection::open(path)?;
    init(conn)
}

/// Open a fresh in-memory database (tests).
pub fn open_in_memory() -> Result<Db, StoreError> {
    let conn = Connection::open_in_memory()?;
    init(conn)
}

fn init(conn: Connection) -> Result<Db, StoreError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    let current: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current != SCHEMA_VERSION {
        if current != 0 {
            tracing::info!(
                old = current,
                new = SCHEMA_VERSION,
                "schema version mismatch, recreating"
            );
            drop_all_tables(&conn)?;
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(Arc::new(Mutex::new(conn)))
}

/// Lock the database, recovering from a poisoned mutex.
pub fn lock(db: &Db) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(|e| {
        tracing::error!("server db mutex poisoned, recovering");
        e.into_inner()
    })
}

/// Drop every user table so the schema can be cleanly re-applied.
fn drop_all_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA foreign_keys=OFF;")?;

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();
    drop(stmt);

    for table in &tables {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    }

    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(())
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    nickname TEXT NOT NULL,
    email TEXT UNIQUE,
    avatar_file TEXT,
    signature TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS friend_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL,
    UNIQUE (sender_id, receiver_id)
);

-- Friendships are undirected: the pair is stored canonically with
-- user_lo < user_hi so A<->B has exactly one row.
CREATE TABLE IF NOT EXISTS friendships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_lo INTEGER NOT NULL REFERENCES users(id),
    user_hi INTEGER NOT NULL REFERENCES users(id),
    created_at INTEGER NOT NULL,
    UNIQUE (user_lo, user_hi),
    CHECK (user_lo < user_hi)
);

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    is_private INTEGER NOT NULL DEFAULT 0,
    password TEXT,
    sprint_active INTEGER NOT NULL DEFAULT 0,
    sprint_start_time INTEGER,
    sprint_target_words INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- UNIQUE(user_id) is the single-room invariant: a user is in at most
-- one room at any time.
CREATE TABLE IF NOT EXISTS group_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS group_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    sender_id INTEGER REFERENCES users(id),
    sender_nickname TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_messages
    ON group_messages(group_id, timestamp);

CREATE TABLE IF NOT EXISTS sprint_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    current_score INTEGER NOT NULL DEFAULT 0,
    UNIQUE (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS daily_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    report_date TEXT NOT NULL,
    total_words INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, report_date)
);

CREATE TABLE IF NOT EXISTS detail_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    word_increment INTEGER NOT NULL,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    source_type TEXT NOT NULL DEFAULT 'client_sync',
    end_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detail_records
    ON detail_records(user_id, end_time);
";
