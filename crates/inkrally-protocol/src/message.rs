//! Wire message vocabulary.
//!
//! Every plaintext frame is a JSON object with a `type` discriminator.
//! Clients send [`Request`] frames; the server answers with the paired
//! [`Response`] type and fans out unsolicited [`Push`] frames to online
//! sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status discriminator carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
    Error,
    Ok,
}

/// Action on a pending friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendAction {
    Accept,
    Reject,
}

/// Owner-issued sprint transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintAction {
    Start,
    Stop,
}

/// Presence of a friend, derived from the session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Offline,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Client → server frames.
///
/// An unrecognized `type` deserializes as [`Request::Unknown`] and is
/// answered with a generic acknowledgement rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Register {
        username: String,
        password: String,
        #[serde(default)]
        email: Option<String>,
    },
    Login {
        username: String,
        password: String,
    },
    SendCode {
        username: String,
    },
    ResetPassword {
        username: String,
        code: String,
        new_password: String,
    },
    UpdateProfile {
        #[serde(default)]
        nickname: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        signature: Option<String>,
        #[serde(default)]
        avatar_data: Option<String>,
    },
    SyncData {
        increment: i64,
        #[serde(default)]
        duration: i64,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        local_date: Option<String>,
    },
    GetAnalytics,
    GetDetails,
    SearchUser {
        query: String,
    },
    AddFriend {
        friend_id: i64,
    },
    DeleteFriend {
        friend_id: i64,
    },
    GetFriendRequests,
    RespondFriend {
        request_id: i64,
        action: FriendAction,
    },
    GetFriends,
    CreateGroup {
        name: String,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        password: Option<String>,
    },
    GetPublicGroups,
    JoinGroup {
        group_id: i64,
        #[serde(default)]
        password: Option<String>,
    },
    LeaveGroup {
        group_id: i64,
    },
    GroupChat {
        group_id: i64,
        content: String,
    },
    GetGroupDetail {
        group_id: i64,
    },
    SprintControl {
        group_id: i64,
        action: SprintAction,
        #[serde(default)]
        target: i64,
    },
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Persistent room membership echoed back at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentGroup {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
}

/// Profile fields returned by `search_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub signature: String,
}

/// One incoming friend request with the sender's profile fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestEntry {
    pub request_id: i64,
    pub user_id: i64,
    pub username: String,
    pub nickname: String,
}

/// One friend, annotated with presence and cached avatar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendEntry {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub signature: String,
    pub status: PresenceStatus,
    pub avatar_data: String,
}

/// One lobby row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyEntry {
    pub id: i64,
    pub name: String,
    pub owner_nickname: String,
    pub member_count: i64,
    pub has_password: bool,
    pub sprint_active: bool,
    pub is_private: bool,
    pub updated_at: String,
}

/// One line of replayed chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLine {
    pub sender: String,
    pub content: String,
    pub time: i64,
}

/// One leaderboard row, sorted by `word_count` descending with ties broken
/// by `user_id` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub nickname: String,
    pub word_count: i64,
    pub is_online: bool,
    pub avatar_data: String,
    pub reached_target: bool,
}

/// One row of the last-20-records detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailEntry {
    pub time: String,
    pub increment: i64,
    pub duration: i64,
}

/// Payload of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    pub user_id: i64,
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub signature: String,
    pub avatar_data: String,
    pub today_total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_group: Option<CurrentGroup>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Server → client answers, one paired type per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "register_response")]
    Register { status: Status, msg: String },

    #[serde(rename = "login_response")]
    Login {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(flatten)]
        data: Option<Box<LoginData>>,
    },

    #[serde(rename = "code_response")]
    Code { status: Status, msg: String },

    #[serde(rename = "reset_response")]
    Reset { status: Status, msg: String },

    #[serde(rename = "profile_updated")]
    ProfileUpdated { status: Status },

    /// Generic acknowledgement, shared by the frames whose answer carries no
    /// payload beyond status and an optional reason.
    #[serde(rename = "response")]
    Generic {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },

    #[serde(rename = "analytics_data")]
    Analytics { heatmap: BTreeMap<String, i64> },

    #[serde(rename = "details_data")]
    Details { data: Vec<DetailEntry> },

    #[serde(rename = "search_user_response")]
    SearchUser {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<UserSummary>,
    },

    #[serde(rename = "friend_requests_response")]
    FriendRequests { data: Vec<FriendRequestEntry> },

    #[serde(rename = "get_friends_response")]
    Friends { data: Vec<FriendEntry> },

    #[serde(rename = "create_group_response")]
    CreateGroup {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_group_id: Option<i64>,
    },

    #[serde(rename = "group_list_response")]
    GroupList { data: Vec<LobbyEntry> },

    #[serde(rename = "join_group_response")]
    JoinGroup {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_group_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        need_password: Option<bool>,
    },

    #[serde(rename = "leave_group_response")]
    LeaveGroup {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },

    #[serde(rename = "group_detail_response")]
    GroupDetail {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
        #[serde(flatten)]
        data: Option<Box<GroupDetailData>>,
    },
}

/// Payload of a successful `get_group_detail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDetailData {
    pub group_id: i64,
    pub name: String,
    pub owner_id: i64,
    pub owner_avatar: String,
    pub sprint_active: bool,
    pub sprint_target: i64,
    pub chat_history: Vec<ChatLine>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl Response {
    /// The shared `{type: "response"}` acknowledgement.
    pub fn generic(status: Status, msg: Option<String>) -> Self {
        Self::Generic { status, msg }
    }

    /// Answer for an authenticated frame that arrived before `login`.
    pub fn not_logged_in() -> Self {
        Self::Generic {
            status: Status::Error,
            msg: Some("not_logged_in".into()),
        }
    }

    /// Generic acknowledgement for an unknown frame type.
    pub fn ack() -> Self {
        Self::Generic {
            status: Status::Ok,
            msg: Some("Ack".into()),
        }
    }

    /// Generic `{status: fail, msg}` used by the conflict/not-found/forbidden
    /// family of errors.
    pub fn fail(msg: &str) -> Self {
        Self::Generic {
            status: Status::Fail,
            msg: Some(msg.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pushes
// ---------------------------------------------------------------------------

/// Server-originated frames sent without a preceding request. Delivery is
/// best-effort; persistent state in the store stays authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
    RefreshFriends,
    RefreshFriendRequests,
    RefreshGroups,
    GroupMsgPush {
        group_id: i64,
        sender: String,
        content: String,
        time: i64,
    },
    SprintStatusPush {
        group_id: i64,
    },
    GroupDisbanded {
        group_id: i64,
    },
}
