//! Typed queries over the relational schema.
//!
//! Handlers lock the connection for one logical operation, call into this
//! module, and map [`StoreError::Conflict`] onto the wire-level failure
//! kinds. Unique-constraint violations are the normative signal for the
//! schema invariants (taken username, duplicate friend request, second room
//! membership), not something to pre-check and race against.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness invariant rejected the write. The payload is the wire
    /// failure kind (e.g. `username_taken`).
    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn conflict_or(err: rusqlite::Error, kind: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(kind)
    } else {
        StoreError::Sqlite(err)
    }
}

/// Current unix time in seconds.
pub fn timestamp_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .try_into()
        .unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub nickname: String,
    pub email: Option<String>,
    pub avatar_file: Option<String>,
    pub signature: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub is_private: bool,
    pub password: Option<String>,
    pub sprint_active: bool,
    pub sprint_start_time: Option<i64>,
    pub sprint_target_words: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct FriendRequestRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub sender_nickname: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct LobbyRowDb {
    pub id: i64,
    pub name: String,
    pub owner_nickname: String,
    pub member_count: i64,
    pub has_password: bool,
    pub sprint_active: bool,
    pub is_private: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct DetailRow {
    pub end_time: i64,
    pub word_increment: i64,
    pub duration_seconds: i64,
}

/// Canonical undirected friendship pair. The constructor orders the ids, so
/// callers can never store `(B, A)` alongside `(A, B)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendPair {
    lo: i64,
    hi: i64,
}

impl FriendPair {
    /// Returns `None` for a self-pair, which has no canonical form.
    pub fn new(a: i64, b: i64) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { lo: a, hi: b }),
            std::cmp::Ordering::Greater => Some(Self { lo: b, hi: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }

    pub fn hi(&self) -> i64 {
        self.hi
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

const USER_COLS: &str =
    "id, username, password_hash, nickname, email, avatar_file, signature, created_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        nickname: row.get(3)?,
        email: row.get(4)?,
        avatar_file: row.get(5)?,
        signature: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Insert a new account. Nickname defaults to the username.
pub fn insert_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    email: Option<&str>,
    now: i64,
) -> Result<i64, StoreError> {
    let result = conn.execute(
        "INSERT INTO users (username, password_hash, nickname, email, created_at)
         VALUES (?1, ?2, ?1, ?3, ?4)",
        params![username, password_hash, email, now],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => {
            if e.to_string().contains("users.email") {
                Err(StoreError::Conflict("email_taken"))
            } else {
                Err(StoreError::Conflict("username_taken"))
            }
        }
        Err(e) => Err(e.into()),
    }
}

pub fn user_by_username(conn: &Connection, username: &str) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE username = ?"),
            params![username],
            map_user,
        )
        .optional()?;
    Ok(user)
}

pub fn user_by_id(conn: &Connection, id: i64) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?"),
            params![id],
            map_user,
        )
        .optional()?;
    Ok(user)
}

/// Exact-match lookup by numeric id, username, or nickname.
pub fn search_user(conn: &Connection, query: &str) -> Result<Option<User>, StoreError> {
    let user = if let Ok(id) = query.parse::<i64>() {
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?1 OR username = ?2 OR nickname = ?2 LIMIT 1"),
            params![id, query],
            map_user,
        )
        .optional()?
    } else {
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE username = ?1 OR nickname = ?1 LIMIT 1"),
            params![query],
            map_user,
        )
        .optional()?
    };
    Ok(user)
}

pub fn update_password(conn: &Connection, user_id: i64, hash: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        params![hash, user_id],
    )?;
    Ok(())
}

/// Partial profile update. An empty nickname is ignored; an empty email
/// clears the column.
pub fn update_profile_fields(
    conn: &Connection,
    user_id: i64,
    nickname: Option<&str>,
    email: Option<&str>,
    signature: Option<&str>,
    avatar_file: Option<&str>,
) -> Result<(), StoreError> {
    if let Some(nick) = nickname.filter(|n| !n.is_empty()) {
        conn.execute(
            "UPDATE users SET nickname = ? WHERE id = ?",
            params![nick, user_id],
        )?;
    }
    if let Some(email) = email {
        let value = email.trim();
        let value = (!value.is_empty()).then_some(value);
        conn.execute(
            "UPDATE users SET email = ? WHERE id = ?",
            params![value, user_id],
        )
        .map_err(|e| conflict_or(e, "email_taken"))?;
    }
    if let Some(signature) = signature {
        conn.execute(
            "UPDATE users SET signature = ? WHERE id = ?",
            params![signature, user_id],
        )?;
    }
    if let Some(file) = avatar_file {
        conn.execute(
            "UPDATE users SET avatar_file = ? WHERE id = ?",
            params![file, user_id],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Friend graph
// ---------------------------------------------------------------------------

pub fn friendship_exists(conn: &Connection, pair: &FriendPair) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friendships WHERE user_lo = ? AND user_hi = ?",
            params![pair.lo(), pair.hi()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_friendship(
    conn: &Connection,
    pair: &FriendPair,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO friendships (user_lo, user_hi, created_at) VALUES (?, ?, ?)",
        params![pair.lo(), pair.hi(), now],
    )
    .map_err(|e| conflict_or(e, "already_friends"))?;
    Ok(())
}

/// Returns whether a row was deleted.
pub fn delete_friendship(conn: &Connection, pair: &FriendPair) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM friendships WHERE user_lo = ? AND user_hi = ?",
        params![pair.lo(), pair.hi()],
    )?;
    Ok(deleted > 0)
}

/// Ids of every friend of `user_id`, read from either side of the canonical
/// row.
pub fn friend_ids(conn: &Connection, user_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_hi FROM friendships WHERE user_lo = ?1
         UNION
         SELECT user_lo FROM friendships WHERE user_hi = ?1",
    )?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Whether a friend request exists between the two users, in either
/// direction.
pub fn request_exists_between(conn: &Connection, a: i64, b: i64) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM friend_requests
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)",
            params![a, b],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_friend_request(
    conn: &Connection,
    sender_id: i64,
    receiver_id: i64,
    now: i64,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO friend_requests (sender_id, receiver_id, created_at) VALUES (?, ?, ?)",
        params![sender_id, receiver_id, now],
    )
    .map_err(|e| conflict_or(e, "request_pending"))?;
    Ok(conn.last_insert_rowid())
}

pub fn friend_request_by_id(
    conn: &Connection,
    id: i64,
) -> Result<Option<FriendRequestRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, sender_id, receiver_id FROM friend_requests WHERE id = ?",
            params![id],
            |row| {
                Ok(FriendRequestRow {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    receiver_id: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn delete_friend_request(conn: &Connection, id: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM friend_requests WHERE id = ?", params![id])?;
    Ok(())
}

/// Incoming requests for `receiver_id`, joined with the sender's profile.
pub fn incoming_requests(
    conn: &Connection,
    receiver_id: i64,
) -> Result<Vec<(i64, User)>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT r.id, {cols} FROM friend_requests r
         JOIN users u ON u.id = r.sender_id
         WHERE r.receiver_id = ?
         ORDER BY r.id",
        cols = "u.id, u.username, u.password_hash, u.nickname, u.email, u.avatar_file, u.signature, u.created_at",
    ))?;
    let rows = stmt
        .query_map(params![receiver_id], |row| {
            let request_id: i64 = row.get(0)?;
            let user = User {
                id: row.get(1)?,
                username: row.get(2)?,
                password_hash: row.get(3)?,
                nickname: row.get(4)?,
                email: row.get(5)?,
                avatar_file: row.get(6)?,
                signature: row.get(7)?,
                created_at: row.get(8)?,
            };
            Ok((request_id, user))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Groups & membership
// ---------------------------------------------------------------------------

const GROUP_COLS: &str = "id, name, owner_id, is_private, password, sprint_active, \
                          sprint_start_time, sprint_target_words, created_at, updated_at";

fn map_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        is_private: row.get(3)?,
        password: row.get(4)?,
        sprint_active: row.get(5)?,
        sprint_start_time: row.get(6)?,
        sprint_target_words: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn group_by_id(conn: &Connection, id: i64) -> Result<Option<GroupRow>, StoreError> {
    let group = conn
        .query_row(
            &format!("SELECT {GROUP_COLS} FROM groups WHERE id = ?"),
            params![id],
            map_group,
        )
        .optional()?;
    Ok(group)
}

pub fn insert_group(
    conn: &Connection,
    name: &str,
    owner_id: i64,
    is_private: bool,
    password: Option<&str>,
    now: i64,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO groups (name, owner_id, is_private, password, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?5, ?5)",
        params![name, owner_id, is_private, password, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_group(conn: &Connection, group_id: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM groups WHERE id = ?", params![group_id])?;
    Ok(())
}

pub fn touch_group(conn: &Connection, group_id: i64, now: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE groups SET updated_at = ? WHERE id = ?",
        params![now, group_id],
    )?;
    Ok(())
}

/// The room the user currently belongs to, if any.
pub fn membership_group_of(conn: &Connection, user_id: i64) -> Result<Option<i64>, StoreError> {
    let group_id = conn
        .query_row(
            "SELECT group_id FROM group_members WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(group_id)
}

pub fn insert_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO group_members (group_id, user_id) VALUES (?, ?)",
        params![group_id, user_id],
    )
    .map_err(|e| conflict_or(e, "already_in_group"))?;
    Ok(())
}

pub fn remove_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM group_members WHERE group_id = ? AND user_id = ?",
        params![group_id, user_id],
    )?;
    Ok(deleted > 0)
}

pub fn is_member(conn: &Connection, group_id: i64, user_id: i64) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?",
            params![group_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn member_count(conn: &Connection, group_id: i64) -> Result<i64, StoreError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?",
        params![group_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn member_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM group_members WHERE group_id = ? ORDER BY id")?;
    let ids = stmt
        .query_map(params![group_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Lobby listing: public rooms plus private rooms owned by one of
/// `friend_ids`, newest activity first.
pub fn lobby_rows(
    conn: &Connection,
    friend_ids: &[i64],
    limit: i64,
) -> Result<Vec<LobbyRowDb>, StoreError> {
    let select = "SELECT g.id, g.name, COALESCE(u.nickname, 'Unknown'),
            (SELECT COUNT(*) FROM group_members m WHERE m.group_id = g.id),
            (g.password IS NOT NULL AND g.password <> ''),
            g.sprint_active, g.is_private, g.updated_at
         FROM groups g
         LEFT JOIN users u ON u.id = g.owner_id";

    let sql = if friend_ids.is_empty() {
        format!("{select} WHERE g.is_private = 0 ORDER BY g.updated_at DESC LIMIT ?")
    } else {
        let placeholders = vec!["?"; friend_ids.len()].join(",");
        format!(
            "{select} WHERE g.is_private = 0 OR g.owner_id IN ({placeholders})
             ORDER BY g.updated_at DESC LIMIT ?"
        )
    };

    let mut stmt = conn.prepare(&sql)?;
    let bound = friend_ids.iter().copied().chain(std::iter::once(limit));
    let rows = stmt
        .query_map(rusqlite::params_from_iter(bound), |row| {
            Ok(LobbyRowDb {
                id: row.get(0)?,
                name: row.get(1)?,
                owner_nickname: row.get(2)?,
                member_count: row.get(3)?,
                has_password: row.get(4)?,
                sprint_active: row.get(5)?,
                is_private: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

pub fn insert_group_message(
    conn: &Connection,
    group_id: i64,
    sender_id: Option<i64>,
    sender_nickname: &str,
    content: &str,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO group_messages (group_id, sender_id, sender_nickname, content, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![group_id, sender_id, sender_nickname, content, now],
    )?;
    Ok(())
}

/// Replay window for late joiners, oldest first.
pub fn messages_since(
    conn: &Connection,
    group_id: i64,
    since: i64,
) -> Result<Vec<MessageRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sender_nickname, content, timestamp FROM group_messages
         WHERE group_id = ? AND timestamp >= ?
         ORDER BY timestamp ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![group_id, since], |row| {
            Ok(MessageRow {
                sender_nickname: row.get(0)?,
                content: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Sprint scores
// ---------------------------------------------------------------------------

pub fn clear_sprint_scores(conn: &Connection, group_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM sprint_scores WHERE group_id = ?",
        params![group_id],
    )?;
    Ok(())
}

pub fn delete_sprint_score(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM sprint_scores WHERE group_id = ? AND user_id = ?",
        params![group_id, user_id],
    )?;
    Ok(())
}

pub fn upsert_sprint_score(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
    delta: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sprint_scores (group_id, user_id, current_score) VALUES (?, ?, ?)
         ON CONFLICT(group_id, user_id)
         DO UPDATE SET current_score = current_score + excluded.current_score",
        params![group_id, user_id, delta],
    )?;
    Ok(())
}

pub fn sprint_scores(conn: &Connection, group_id: i64) -> Result<HashMap<i64, i64>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT user_id, current_score FROM sprint_scores WHERE group_id = ?")?;
    let rows = stmt
        .query_map(params![group_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<i64, i64>, _>>()?;
    Ok(rows)
}

pub fn start_sprint(
    conn: &Connection,
    group_id: i64,
    now: i64,
    target: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE groups SET sprint_active = 1, sprint_start_time = ?, sprint_target_words = ?
         WHERE id = ?",
        params![now, target, group_id],
    )?;
    Ok(())
}

pub fn stop_sprint(conn: &Connection, group_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE groups SET sprint_active = 0 WHERE id = ?",
        params![group_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

pub fn insert_detail_record(
    conn: &Connection,
    user_id: i64,
    word_increment: i64,
    duration_seconds: i64,
    source_type: &str,
    end_time: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO detail_records (user_id, word_increment, duration_seconds, source_type, end_time)
         VALUES (?, ?, ?, ?, ?)",
        params![user_id, word_increment, duration_seconds, source_type, end_time],
    )?;
    Ok(())
}

pub fn upsert_daily_report(
    conn: &Connection,
    user_id: i64,
    report_date: &str,
    increment: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO daily_reports (user_id, report_date, total_words) VALUES (?, ?, ?)
         ON CONFLICT(user_id, report_date)
         DO UPDATE SET total_words = total_words + excluded.total_words",
        params![user_id, report_date, increment],
    )?;
    Ok(())
}

pub fn daily_total(conn: &Connection, user_id: i64, report_date: &str) -> Result<i64, StoreError> {
    let total = conn
        .query_row(
            "SELECT total_words FROM daily_reports WHERE user_id = ? AND report_date = ?",
            params![user_id, report_date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(total.unwrap_or(0))
}

/// `(date, total)` pairs on or after `since` (ISO dates compare
/// lexicographically).
pub fn heatmap_since(
    conn: &Connection,
    user_id: i64,
    since: &str,
) -> Result<Vec<(String, i64)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT report_date, total_words FROM daily_reports
         WHERE user_id = ? AND report_date >= ?",
    )?;
    let rows = stmt
        .query_map(params![user_id, since], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn recent_details(
    conn: &Connection,
    user_id: i64,
    limit: i64,
) -> Result<Vec<DetailRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT end_time, word_increment, duration_seconds FROM detail_records
         WHERE user_id = ?
         ORDER BY end_time DESC, id DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![user_id, limit], |row| {
            Ok(DetailRow {
                end_time: row.get(0)?,
                word_increment: row.get(1)?,
                duration_seconds: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
