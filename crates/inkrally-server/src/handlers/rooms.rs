//! Room membership: create, lobby listing, password-gated join, and the
//! owner-disband rule.

use chrono::TimeZone;
use inkrally_protocol::message::{LobbyEntry, Response, Status};
use inkrally_protocol::Push;

use crate::db;
use crate::server_state::ServerState;
use crate::session::AuthedUser;
use crate::store::{self, StoreError};

/// A room holds at most ten writers.
const MAX_GROUP_MEMBERS: i64 = 10;
/// The lobby shows at most fifty rooms, newest activity first.
const LOBBY_CAP: i64 = 50;

pub fn create_group(
    state: &ServerState,
    user: &AuthedUser,
    name: &str,
    is_private: bool,
    password: Option<&str>,
) -> Result<Response, StoreError> {
    let already_in_group = |current_group_id: i64| Response::CreateGroup {
        status: Status::Fail,
        msg: Some("already_in_group".into()),
        group_id: None,
        group_name: None,
        current_group_id: Some(current_group_id),
    };

    let name = name.trim();
    if name.is_empty() {
        return Ok(Response::CreateGroup {
            status: Status::Fail,
            msg: Some("invalid_name".into()),
            group_id: None,
            group_name: None,
            current_group_id: None,
        });
    }

    let (group_id, friend_ids) = {
        let mut conn = db::lock(&state.db);
        if let Some(current) = store::membership_group_of(&conn, user.user_id)? {
            return Ok(already_in_group(current));
        }

        let tx = conn.transaction()?;
        let now = store::timestamp_now();
        let group_id = store::insert_group(
            &tx,
            name,
            user.user_id,
            is_private,
            password.filter(|p| !p.is_empty()),
            now,
        )?;
        match store::insert_member(&tx, group_id, user.user_id) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // Lost a race against another session of the same user; the
                // group insert rolls back with the dropped transaction.
                drop(tx);
                let current = store::membership_group_of(&conn, user.user_id)?.unwrap_or(group_id);
                return Ok(already_in_group(current));
            }
            Err(e) => return Err(e),
        }
        tx.commit()?;

        let friend_ids = if is_private {
            store::friend_ids(&conn, user.user_id)?
        } else {
            Vec::new()
        };
        (group_id, friend_ids)
    };

    // A private room only surfaces in its owner's friends' lobbies.
    if is_private {
        state.registry.send_many(&friend_ids, &Push::RefreshGroups);
    } else {
        state.registry.broadcast_all(&Push::RefreshGroups);
    }
    tracing::info!(group = group_id, owner = user.user_id, "group created");

    Ok(Response::CreateGroup {
        status: Status::Success,
        msg: None,
        group_id: Some(group_id),
        group_name: Some(name.to_string()),
        current_group_id: None,
    })
}

pub fn get_public_groups(state: &ServerState, user: &AuthedUser) -> Result<Response, StoreError> {
    let conn = db::lock(&state.db);
    let friend_ids = store::friend_ids(&conn, user.user_id)?;
    let data = store::lobby_rows(&conn, &friend_ids, LOBBY_CAP)?
        .into_iter()
        .map(|row| LobbyEntry {
            id: row.id,
            name: row.name,
            owner_nickname: row.owner_nickname,
            member_count: row.member_count,
            has_password: row.has_password,
            sprint_active: row.sprint_active,
            is_private: row.is_private,
            updated_at: format_clock(row.updated_at),
        })
        .collect();
    Ok(Response::GroupList { data })
}

pub fn join_group(
    state: &ServerState,
    user: &AuthedUser,
    group_id: i64,
    password: Option<&str>,
) -> Result<Response, StoreError> {
    let fail = |msg: &str| Response::JoinGroup {
        status: Status::Fail,
        msg: Some(msg.into()),
        group_id: None,
        group_name: None,
        current_group_id: None,
        need_password: None,
    };
    let success = |group_id: i64, group_name: String| Response::JoinGroup {
        status: Status::Success,
        msg: None,
        group_id: Some(group_id),
        group_name: Some(group_name),
        current_group_id: None,
        need_password: None,
    };

    let (group_name, is_private) = {
        let mut conn = db::lock(&state.db);

        if let Some(current) = store::membership_group_of(&conn, user.user_id)? {
            if current == group_id {
                // Rejoining the room you are already in is a no-op success.
                let name = store::group_by_id(&conn, group_id)?
                    .map(|g| g.name)
                    .unwrap_or_default();
                return Ok(success(group_id, name));
            }
            return Ok(Response::JoinGroup {
                status: Status::Fail,
                msg: Some("already_in_group".into()),
                group_id: None,
                group_name: None,
                current_group_id: Some(current),
                need_password: None,
            });
        }

        let Some(group) = store::group_by_id(&conn, group_id)? else {
            return Ok(fail("group_not_found"));
        };
        if group.sprint_active {
            return Ok(fail("sprint_active"));
        }
        if let Some(required) = group.password.as_deref().filter(|p| !p.is_empty()) {
            if password != Some(required) {
                return Ok(Response::JoinGroup {
                    status: Status::Fail,
                    msg: Some("incorrect_password".into()),
                    group_id: None,
                    group_name: None,
                    current_group_id: None,
                    need_password: Some(true),
                });
            }
        }
        if store::member_count(&conn, group_id)? >= MAX_GROUP_MEMBERS {
            return Ok(fail("group_full"));
        }

        let tx = conn.transaction()?;
        match store::insert_member(&tx, group_id, user.user_id) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                drop(tx);
                let current = store::membership_group_of(&conn, user.user_id)?;
                return Ok(Response::JoinGroup {
                    status: Status::Fail,
                    msg: Some("already_in_group".into()),
                    group_id: None,
                    group_name: None,
                    current_group_id: current,
                    need_password: None,
                });
            }
            Err(e) => return Err(e),
        }
        store::touch_group(&tx, group_id, store::timestamp_now())?;
        tx.commit()?;

        (group.name, group.is_private)
    };

    if !is_private {
        state.registry.broadcast_all(&Push::RefreshGroups);
    }
    tracing::info!(group = group_id, user = user.user_id, "joined group");
    Ok(success(group_id, group_name))
}

pub fn leave_group(
    state: &ServerState,
    user: &AuthedUser,
    group_id: i64,
) -> Result<Response, StoreError> {
    enum Outcome {
        Disbanded { former_members: Vec<i64> },
        Left { remaining: Vec<i64> },
    }

    let outcome = {
        let mut conn = db::lock(&state.db);
        let Some(group) = store::group_by_id(&conn, group_id)? else {
            return Ok(Response::LeaveGroup {
                status: Status::Fail,
                msg: Some("group_not_found".into()),
            });
        };

        if group.owner_id == user.user_id {
            // The owner leaving disbands the room; members, messages, and
            // scores go with the group row.
            let former_members = store::member_ids(&conn, group_id)?;
            let tx = conn.transaction()?;
            store::delete_group(&tx, group_id)?;
            tx.commit()?;
            Outcome::Disbanded { former_members }
        } else {
            let tx = conn.transaction()?;
            store::remove_member(&tx, group_id, user.user_id)?;
            store::delete_sprint_score(&tx, group_id, user.user_id)?;
            tx.commit()?;
            let remaining = store::member_ids(&conn, group_id)?;
            Outcome::Left { remaining }
        }
    };

    match outcome {
        Outcome::Disbanded { former_members } => {
            // The disband push goes out only after the delete committed.
            state
                .registry
                .send_many(&former_members, &Push::GroupDisbanded { group_id });
            state.registry.broadcast_all(&Push::RefreshGroups);
            tracing::info!(group = group_id, owner = user.user_id, "group disbanded");
            Ok(Response::LeaveGroup {
                status: Status::Success,
                msg: Some("Group disbanded".into()),
            })
        }
        Outcome::Left { remaining } => {
            state.registry.broadcast_all(&Push::RefreshGroups);
            state
                .registry
                .send_many(&remaining, &Push::SprintStatusPush { group_id });
            tracing::info!(group = group_id, user = user.user_id, "left group");
            Ok(Response::LeaveGroup {
                status: Status::Success,
                msg: None,
            })
        }
    }
}

/// Lobby rows show activity as a wall-clock `HH:MM`.
fn format_clock(ts: i64) -> String {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default()
}
