//! Friend graph: search, requests, accept/reject, deletion, and the
//! presence-annotated friend list.

use inkrally_protocol::message::{
    FriendAction, FriendEntry, FriendRequestEntry, PresenceStatus, Response, Status, UserSummary,
};
use inkrally_protocol::Push;

use crate::avatars;
use crate::db;
use crate::server_state::ServerState;
use crate::session::AuthedUser;
use crate::store::{self, FriendPair, StoreError};

pub fn search_user(state: &ServerState, query: &str) -> Result<Response, StoreError> {
    let conn = db::lock(&state.db);
    match store::search_user(&conn, query)? {
        Some(user) => Ok(Response::SearchUser {
            status: Status::Success,
            msg: None,
            data: Some(UserSummary {
                id: user.id,
                username: user.username,
                nickname: user.nickname,
                signature: user.signature,
            }),
        }),
        None => Ok(Response::SearchUser {
            status: Status::Fail,
            msg: Some("user_not_found".into()),
            data: None,
        }),
    }
}

pub fn add_friend(
    state: &ServerState,
    user: &AuthedUser,
    friend_id: i64,
) -> Result<Response, StoreError> {
    let Some(pair) = FriendPair::new(user.user_id, friend_id) else {
        return Ok(Response::fail("cannot_add_self"));
    };

    {
        let conn = db::lock(&state.db);
        if store::user_by_id(&conn, friend_id)?.is_none() {
            return Ok(Response::fail("user_not_found"));
        }
        if store::friendship_exists(&conn, &pair)? {
            return Ok(Response::fail("already_friends"));
        }
        if store::request_exists_between(&conn, user.user_id, friend_id)? {
            return Ok(Response::fail("request_pending"));
        }
        match store::insert_friend_request(&conn, user.user_id, friend_id, store::timestamp_now())
        {
            Ok(_) => {}
            Err(StoreError::Conflict(kind)) => return Ok(Response::fail(kind)),
            Err(e) => return Err(e),
        }
    }

    state.registry.send(friend_id, &Push::RefreshFriendRequests);
    tracing::debug!(from = user.user_id, to = friend_id, "friend request sent");
    Ok(Response::generic(
        Status::Success,
        Some("request_sent".into()),
    ))
}

pub fn delete_friend(
    state: &ServerState,
    user: &AuthedUser,
    friend_id: i64,
) -> Result<Response, StoreError> {
    let Some(pair) = FriendPair::new(user.user_id, friend_id) else {
        return Ok(Response::fail("friendship_not_found"));
    };

    let deleted = {
        let conn = db::lock(&state.db);
        store::delete_friendship(&conn, &pair)?
    };
    if !deleted {
        return Ok(Response::fail("friendship_not_found"));
    }

    state.registry.send(friend_id, &Push::RefreshFriends);
    Ok(Response::generic(
        Status::Success,
        Some("friend_deleted".into()),
    ))
}

pub fn get_friend_requests(
    state: &ServerState,
    user: &AuthedUser,
) -> Result<Response, StoreError> {
    let conn = db::lock(&state.db);
    let data = store::incoming_requests(&conn, user.user_id)?
        .into_iter()
        .map(|(request_id, sender)| FriendRequestEntry {
            request_id,
            user_id: sender.id,
            username: sender.username,
            nickname: sender.nickname,
        })
        .collect();
    Ok(Response::FriendRequests { data })
}

pub fn respond_friend(
    state: &ServerState,
    user: &AuthedUser,
    request_id: i64,
    action: FriendAction,
) -> Result<Response, StoreError> {
    let sender_id = {
        let mut conn = db::lock(&state.db);
        let Some(request) = store::friend_request_by_id(&conn, request_id)? else {
            return Ok(Response::fail("invalid_request"));
        };
        // Only the addressee may answer.
        if request.receiver_id != user.user_id {
            return Ok(Response::fail("invalid_request"));
        }

        let tx = conn.transaction()?;
        match action {
            FriendAction::Accept => {
                let Some(pair) = FriendPair::new(user.user_id, request.sender_id) else {
                    return Ok(Response::fail("invalid_request"));
                };
                match store::insert_friendship(&tx, &pair, store::timestamp_now()) {
                    // A crossed accept already created the row; fine.
                    Ok(()) | Err(StoreError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
                store::delete_friend_request(&tx, request_id)?;
            }
            FriendAction::Reject => {
                store::delete_friend_request(&tx, request_id)?;
            }
        }
        tx.commit()?;
        request.sender_id
    };

    match action {
        FriendAction::Accept => {
            state
                .registry
                .send_many(&[user.user_id, sender_id], &Push::RefreshFriends);
        }
        FriendAction::Reject => {
            state
                .registry
                .send(user.user_id, &Push::RefreshFriendRequests);
        }
    }
    Ok(Response::generic(Status::Success, None))
}

pub fn get_friends(state: &ServerState, user: &AuthedUser) -> Result<Response, StoreError> {
    let friends = {
        let conn = db::lock(&state.db);
        let ids = store::friend_ids(&conn, user.user_id)?;
        let mut friends = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(friend) = store::user_by_id(&conn, id)? {
                friends.push(friend);
            }
        }
        friends
    };

    let data = friends
        .into_iter()
        .map(|friend| {
            let status = if state.registry.is_online(friend.id) {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            };
            FriendEntry {
                id: friend.id,
                username: friend.username,
                nickname: friend.nickname,
                signature: friend.signature,
                status,
                avatar_data: avatars::load_avatar_b64(
                    &state.avatar_dir,
                    friend.avatar_file.as_deref(),
                ),
            }
        })
        .collect();
    Ok(Response::Friends { data })
}
