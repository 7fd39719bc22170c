//! Request routing and the domain handler modules.

mod activity;
mod auth;
mod friends;
mod rooms;
mod sprint;

use inkrally_protocol::message::{Request, Response, Status};

use crate::server_state::ServerState;
use crate::session::{AuthedUser, ConnContext};
use crate::store::StoreError;

/// Route one decoded frame to its handler and produce the optional reply.
///
/// Only `register`, `login`, `send_code`, and `reset_password` are served
/// before a login binds a user to the connection; everything else answers
/// `not_logged_in` until then. An unknown frame type gets a generic ack.
pub fn dispatch(state: &ServerState, conn: &mut ConnContext, request: Request) -> Option<Response> {
    match request {
        Request::Register {
            username,
            password,
            email,
        } => respond(auth::register(state, &username, &password, email.as_deref())),
        Request::Login { username, password } => {
            respond(auth::login(state, conn, &username, &password))
        }
        Request::SendCode { username } => respond(auth::send_code(state, &username)),
        Request::ResetPassword {
            username,
            code,
            new_password,
        } => respond(auth::reset_password(state, &username, &code, &new_password)),
        Request::Unknown => Some(Response::ack()),
        authenticated => {
            let Some(user) = conn.authed.clone() else {
                return Some(Response::not_logged_in());
            };
            dispatch_authed(state, &user, authenticated)
        }
    }
}

fn dispatch_authed(state: &ServerState, user: &AuthedUser, request: Request) -> Option<Response> {
    match request {
        Request::UpdateProfile {
            nickname,
            email,
            signature,
            avatar_data,
        } => respond(auth::update_profile(
            state,
            user,
            nickname.as_deref(),
            email.as_deref(),
            signature.as_deref(),
            avatar_data.as_deref(),
        )),

        Request::SyncData {
            increment,
            duration,
            timestamp,
            local_date,
        } => respond_opt(activity::sync_data(
            state,
            user,
            increment,
            duration,
            timestamp,
            local_date.as_deref(),
        )),
        Request::GetAnalytics => respond(activity::get_analytics(state, user)),
        Request::GetDetails => respond(activity::get_details(state, user)),

        Request::SearchUser { query } => respond(friends::search_user(state, &query)),
        Request::AddFriend { friend_id } => respond(friends::add_friend(state, user, friend_id)),
        Request::DeleteFriend { friend_id } => {
            respond(friends::delete_friend(state, user, friend_id))
        }
        Request::GetFriendRequests => respond(friends::get_friend_requests(state, user)),
        Request::RespondFriend { request_id, action } => {
            respond(friends::respond_friend(state, user, request_id, action))
        }
        Request::GetFriends => respond(friends::get_friends(state, user)),

        Request::CreateGroup {
            name,
            is_private,
            password,
        } => respond(rooms::create_group(
            state,
            user,
            &name,
            is_private,
            password.as_deref(),
        )),
        Request::GetPublicGroups => respond(rooms::get_public_groups(state, user)),
        Request::JoinGroup { group_id, password } => {
            respond(rooms::join_group(state, user, group_id, password.as_deref()))
        }
        Request::LeaveGroup { group_id } => respond(rooms::leave_group(state, user, group_id)),

        Request::GroupChat { group_id, content } => {
            respond_opt(sprint::group_chat(state, user, group_id, &content))
        }
        Request::GetGroupDetail { group_id } => {
            respond(sprint::get_group_detail(state, user, group_id))
        }
        Request::SprintControl {
            group_id,
            action,
            target,
        } => respond(sprint::sprint_control(state, user, group_id, action, target)),

        Request::Register { .. }
        | Request::Login { .. }
        | Request::SendCode { .. }
        | Request::ResetPassword { .. }
        | Request::Unknown => unreachable!("handled before the auth gate"),
    }
}

/// Map an unexpected store failure onto the transient `{status: error}`
/// answer; the connection stays open.
fn respond(result: Result<Response, StoreError>) -> Option<Response> {
    Some(match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "handler failed");
            Response::generic(Status::Error, None)
        }
    })
}

fn respond_opt(result: Result<Option<Response>, StoreError>) -> Option<Response> {
    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "handler failed");
            Some(Response::generic(Status::Error, None))
        }
    }
}
