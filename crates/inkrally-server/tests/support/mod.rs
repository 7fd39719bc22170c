//! Shared fixtures: an in-memory server state, a recording mailer, and
//! channel-backed fake sessions that drive the dispatcher directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use inkrally_protocol::message::{FriendAction, Request, Response, Status};
use inkrally_server::db;
use inkrally_server::handlers;
use inkrally_server::mailer::MailSender;
use inkrally_server::server_state::ServerState;
use inkrally_server::session::ConnContext;

/// Mailer that records every delivery and can be told to fail.
pub struct RecordingMailer {
    succeed: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            succeed: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn last_code(&self) -> Option<String> {
        self.sent.lock().last().map(|(_, code)| code.clone())
    }

    pub fn fail_sends(&self) {
        self.succeed.store(false, Ordering::SeqCst);
    }
}

impl MailSender for RecordingMailer {
    fn send_verification_code(&self, email: &str, code: &str) -> bool {
        if !self.succeed.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push((email.to_string(), code.to_string()));
        true
    }
}

pub struct Harness {
    pub state: Arc<ServerState>,
    pub mailer: Arc<RecordingMailer>,
    _tmp: tempfile::TempDir,
}

pub fn harness() -> Harness {
    let tmp = tempfile::TempDir::new().unwrap();
    let mailer = RecordingMailer::new();
    let state = Arc::new(ServerState::new(
        db::open_in_memory().unwrap(),
        mailer.clone(),
        tmp.path().join("avatars"),
    ));
    Harness {
        state,
        mailer,
        _tmp: tmp,
    }
}

/// One fake connection: a dispatcher context plus the receiving end of its
/// push queue.
pub struct TestClient {
    pub ctx: ConnContext,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub fn connect(state: &ServerState) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    TestClient {
        ctx: ConnContext {
            session_id: state.registry.next_session_id(),
            tx,
            authed: None,
        },
        rx,
    }
}

impl TestClient {
    pub fn request(&mut self, state: &ServerState, request: Request) -> Option<Response> {
        handlers::dispatch(state, &mut self.ctx, request)
    }

    /// Drain every queued push as parsed JSON.
    pub fn pushes(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(serde_json::from_slice(&frame).unwrap());
        }
        out
    }

    pub fn push_types(&mut self) -> Vec<String> {
        self.pushes()
            .into_iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
    }
}

/// Deterministic stand-in for the client-side SHA-256 credential.
pub fn password_for(username: &str) -> String {
    format!("sha256-of-{username}")
}

pub fn register(state: &ServerState, client: &mut TestClient, username: &str, email: Option<&str>) {
    let resp = client.request(
        state,
        Request::Register {
            username: username.into(),
            password: password_for(username),
            email: email.map(Into::into),
        },
    );
    match resp {
        Some(Response::Register {
            status: Status::Success,
            ..
        }) => {}
        other => panic!("register({username}) failed: {other:?}"),
    }
}

pub fn login(state: &ServerState, client: &mut TestClient, username: &str) -> i64 {
    match client.request(
        state,
        Request::Login {
            username: username.into(),
            password: password_for(username),
        },
    ) {
        Some(Response::Login {
            status: Status::Success,
            data: Some(data),
            ..
        }) => data.user_id,
        other => panic!("login({username}) failed: {other:?}"),
    }
}

/// Register and log in a fresh user; returns its id.
pub fn signup(state: &ServerState, client: &mut TestClient, username: &str) -> i64 {
    register(state, client, username, None);
    login(state, client, username)
}

/// Complete the friend handshake between two logged-in users and drain the
/// refresh pushes it produces.
pub fn make_friends(
    state: &ServerState,
    a: &mut TestClient,
    a_id: i64,
    b: &mut TestClient,
) {
    let resp = a.request(state, Request::AddFriend { friend_id: expect_user_id(b) });
    assert!(
        matches!(
            resp,
            Some(Response::Generic {
                status: Status::Success,
                ..
            })
        ),
        "add_friend failed: {resp:?}"
    );

    let requests = match b.request(state, Request::GetFriendRequests) {
        Some(Response::FriendRequests { data }) => data,
        other => panic!("get_friend_requests failed: {other:?}"),
    };
    let request_id = requests
        .iter()
        .find(|r| r.user_id == a_id)
        .expect("request from a present")
        .request_id;

    let resp = b.request(
        state,
        Request::RespondFriend {
            request_id,
            action: FriendAction::Accept,
        },
    );
    assert!(
        matches!(
            resp,
            Some(Response::Generic {
                status: Status::Success,
                ..
            })
        ),
        "respond_friend failed: {resp:?}"
    );

    a.pushes();
    b.pushes();
}

fn expect_user_id(client: &TestClient) -> i64 {
    client.ctx.authed.as_ref().expect("client logged in").user_id
}

/// Create a room and return its id.
pub fn create_room(
    state: &ServerState,
    client: &mut TestClient,
    name: &str,
    is_private: bool,
    password: Option<&str>,
) -> i64 {
    match client.request(
        state,
        Request::CreateGroup {
            name: name.into(),
            is_private,
            password: password.map(Into::into),
        },
    ) {
        Some(Response::CreateGroup {
            status: Status::Success,
            group_id: Some(group_id),
            ..
        }) => group_id,
        other => panic!("create_group({name}) failed: {other:?}"),
    }
}

pub fn join_room(state: &ServerState, client: &mut TestClient, group_id: i64) {
    match client.request(
        state,
        Request::JoinGroup {
            group_id,
            password: None,
        },
    ) {
        Some(Response::JoinGroup {
            status: Status::Success,
            ..
        }) => {}
        other => panic!("join_group({group_id}) failed: {other:?}"),
    }
}
