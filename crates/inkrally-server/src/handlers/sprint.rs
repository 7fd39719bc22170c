//! Chat fanout, room detail with leaderboard, and the owner-controlled
//! sprint state machine.

use inkrally_protocol::message::{
    ChatLine, GroupDetailData, LeaderboardEntry, Response, SprintAction, Status,
};
use inkrally_protocol::Push;

use crate::avatars;
use crate::db;
use crate::server_state::ServerState;
use crate::session::AuthedUser;
use crate::store::{self, StoreError};

/// Chat history replayed to late joiners.
const CHAT_REPLAY_SECS: i64 = 48 * 3600;

/// Nickname snapshot used for server-generated messages.
const SYSTEM_SENDER: &str = "SYSTEM";

/// A successful chat produces no direct response; the fan-out (which
/// includes the sender) is the echo, so reconnect rendering stays
/// deterministic.
pub fn group_chat(
    state: &ServerState,
    user: &AuthedUser,
    group_id: i64,
    content: &str,
) -> Result<Option<Response>, StoreError> {
    let (nickname, member_ids, now) = {
        let mut conn = db::lock(&state.db);
        if !store::is_member(&conn, group_id, user.user_id)? {
            return Ok(Some(Response::fail("not_a_member")));
        }
        let Some(sender) = store::user_by_id(&conn, user.user_id)? else {
            return Ok(Some(Response::fail("user_not_found")));
        };

        let now = store::timestamp_now();
        let tx = conn.transaction()?;
        store::insert_group_message(
            &tx,
            group_id,
            Some(user.user_id),
            &sender.nickname,
            content,
            now,
        )?;
        store::touch_group(&tx, group_id, now)?;
        tx.commit()?;

        (sender.nickname, store::member_ids(&conn, group_id)?, now)
    };

    state.registry.send_many(
        &member_ids,
        &Push::GroupMsgPush {
            group_id,
            sender: nickname,
            content: content.to_string(),
            time: now,
        },
    );
    Ok(None)
}

pub fn get_group_detail(
    state: &ServerState,
    _user: &AuthedUser,
    group_id: i64,
) -> Result<Response, StoreError> {
    let conn = db::lock(&state.db);
    let Some(group) = store::group_by_id(&conn, group_id)? else {
        return Ok(Response::GroupDetail {
            status: Status::Fail,
            msg: Some("group_not_found".into()),
            data: None,
        });
    };

    let since = store::timestamp_now() - CHAT_REPLAY_SECS;
    let chat_history = store::messages_since(&conn, group_id, since)?
        .into_iter()
        .map(|m| ChatLine {
            sender: m.sender_nickname,
            content: m.content,
            time: m.timestamp,
        })
        .collect();

    let scores = store::sprint_scores(&conn, group_id)?;
    let mut owner_avatar = String::new();
    let mut leaderboard = Vec::new();
    for member_id in store::member_ids(&conn, group_id)? {
        let Some(member) = store::user_by_id(&conn, member_id)? else {
            continue;
        };
        let avatar_data = avatars::load_avatar_b64(&state.avatar_dir, member.avatar_file.as_deref());
        if member.id == group.owner_id {
            owner_avatar.clone_from(&avatar_data);
        }
        let word_count = scores.get(&member.id).copied().unwrap_or(0);
        leaderboard.push(LeaderboardEntry {
            user_id: member.id,
            nickname: member.nickname,
            word_count,
            is_online: state.registry.is_online(member.id),
            avatar_data,
            reached_target: group.sprint_active && word_count >= group.sprint_target_words,
        });
    }
    // Stable, reproducible order: score descending, then id ascending.
    leaderboard.sort_by(|a, b| {
        b.word_count
            .cmp(&a.word_count)
            .then(a.user_id.cmp(&b.user_id))
    });

    Ok(Response::GroupDetail {
        status: Status::Success,
        msg: None,
        data: Some(Box::new(GroupDetailData {
            group_id,
            name: group.name,
            owner_id: group.owner_id,
            owner_avatar,
            sprint_active: group.sprint_active,
            sprint_target: group.sprint_target_words,
            chat_history,
            leaderboard,
        })),
    })
}

pub fn sprint_control(
    state: &ServerState,
    user: &AuthedUser,
    group_id: i64,
    action: SprintAction,
    target: i64,
) -> Result<Response, StoreError> {
    let (content, member_ids, now) = {
        let mut conn = db::lock(&state.db);
        let Some(group) = store::group_by_id(&conn, group_id)? else {
            return Ok(Response::fail("group_not_found"));
        };
        if group.owner_id != user.user_id {
            return Ok(Response::fail("owner_only"));
        }

        let now = store::timestamp_now();
        let tx = conn.transaction()?;
        let content = match action {
            SprintAction::Start => {
                // Scores from a previous sprint must not leak into this one;
                // the wipe and the activation commit together.
                store::clear_sprint_scores(&tx, group_id)?;
                store::start_sprint(&tx, group_id, now, target)?;
                format!("Sprint started! Target: {target} words")
            }
            SprintAction::Stop => {
                // Scores stay in place so the final leaderboard survives.
                store::stop_sprint(&tx, group_id)?;
                "Sprint ended. Scores are final.".to_string()
            }
        };
        store::insert_group_message(&tx, group_id, None, SYSTEM_SENDER, &content, now)?;
        store::touch_group(&tx, group_id, now)?;
        tx.commit()?;

        (content, store::member_ids(&conn, group_id)?, now)
    };

    tracing::info!(group = group_id, ?action, "sprint state changed");
    state.registry.send_many(
        &member_ids,
        &Push::GroupMsgPush {
            group_id,
            sender: SYSTEM_SENDER.into(),
            content,
            time: now,
        },
    );
    state
        .registry
        .send_many(&member_ids, &Push::SprintStatusPush { group_id });
    state.registry.broadcast_all(&Push::RefreshGroups);

    Ok(Response::generic(Status::Success, None))
}
