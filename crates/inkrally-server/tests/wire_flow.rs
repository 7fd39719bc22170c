//! Full wire-protocol tests: real TCP sockets, the RSA handshake, sealed
//! frames, and push delivery through live connections.

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use inkrally_crypto::{wrap_session_key, HandshakeKeys, SessionKey};
use inkrally_protocol::message::Request;
use inkrally_protocol::{codec, frame};
use inkrally_server::server_state::ServerState;
use inkrally_server::session;
use support::{harness, password_for};

async fn start_server(state: Arc<ServerState>) -> SocketAddr {
    let keys = Arc::new(HandshakeKeys::generate().unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                break;
            };
            tokio::spawn(session::run_connection(
                Arc::clone(&state),
                Arc::clone(&keys),
                stream,
                peer,
            ));
        }
    });
    addr
}

/// Minimal wire client: performs the handshake, then speaks sealed frames.
struct WireClient {
    stream: TcpStream,
    key: SessionKey,
}

impl WireClient {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let pem_frame = frame::read_frame(&mut stream).await.unwrap().unwrap();
        let pem = String::from_utf8(pem_frame).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let key = SessionKey::generate();
        let wrapped = wrap_session_key(&pem, &key).unwrap();
        frame::write_frame(&mut stream, &wrapped).await.unwrap();

        Self { stream, key }
    }

    async fn send(&mut self, request: &Request) {
        let sealed = codec::seal(&self.key, request).unwrap();
        frame::write_frame(&mut self.stream, &sealed).await.unwrap();
    }

    async fn recv(&mut self) -> serde_json::Value {
        let body = frame::read_frame(&mut self.stream).await.unwrap().unwrap();
        codec::open(&self.key, &body).unwrap()
    }

    /// `None` when the server closed the connection.
    async fn recv_or_eof(&mut self) -> Option<serde_json::Value> {
        match frame::read_frame(&mut self.stream).await {
            Ok(Some(body)) => Some(codec::open(&self.key, &body).unwrap()),
            _ => None,
        }
    }
}

async fn wait_until_offline(state: &ServerState, user_id: i64) {
    for _ in 0..50 {
        if !state.registry.is_online(user_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("user {user_id} never went offline");
}

#[tokio::test]
async fn register_login_and_sync_over_the_wire() {
    let h = harness();
    let addr = start_server(Arc::clone(&h.state)).await;
    let mut client = WireClient::connect(addr).await;

    client
        .send(&Request::Register {
            username: "alice".into(),
            password: password_for("alice"),
            email: None,
        })
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["type"], "register_response");
    assert_eq!(resp["status"], "success");

    client
        .send(&Request::Login {
            username: "alice".into(),
            password: password_for("alice"),
        })
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["type"], "login_response");
    assert_eq!(resp["status"], "success");
    assert_eq!(resp["today_total"], 0);
    let user_id = resp["user_id"].as_i64().unwrap();
    assert!(h.state.registry.is_online(user_id));

    client
        .send(&Request::SyncData {
            increment: 50,
            duration: 0,
            timestamp: None,
            local_date: None,
        })
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["type"], "response");
    assert_eq!(resp["status"], "ok");

    // Disconnect detaches the session.
    drop(client);
    wait_until_offline(&h.state, user_id).await;
}

#[tokio::test]
async fn frames_before_login_are_rejected_politely() {
    let h = harness();
    let addr = start_server(Arc::clone(&h.state)).await;
    let mut client = WireClient::connect(addr).await;

    client.send(&Request::GetFriends).await;
    let resp = client.recv().await;
    assert_eq!(resp["type"], "response");
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["msg"], "not_logged_in");

    // The connection is still usable afterwards.
    client
        .send(&Request::Register {
            username: "bob".into(),
            password: password_for("bob"),
            email: None,
        })
        .await;
    assert_eq!(client.recv().await["status"], "success");
}

#[tokio::test]
async fn bad_session_key_is_dropped_without_a_reply() {
    let h = harness();
    let addr = start_server(Arc::clone(&h.state)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _pem = frame::read_frame(&mut stream).await.unwrap().unwrap();
    frame::write_frame(&mut stream, &[0u8; 256]).await.unwrap();

    // The server closes without replying.
    let next = frame::read_frame(&mut stream).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn undecodable_frame_terminates_the_session() {
    let h = harness();
    let addr = start_server(Arc::clone(&h.state)).await;
    let mut client = WireClient::connect(addr).await;

    client
        .send(&Request::Register {
            username: "carol".into(),
            password: password_for("carol"),
            email: None,
        })
        .await;
    client.recv().await;
    client
        .send(&Request::Login {
            username: "carol".into(),
            password: password_for("carol"),
        })
        .await;
    let user_id = client.recv().await["user_id"].as_i64().unwrap();

    // A frame that does not decrypt kills the connection.
    frame::write_frame(&mut client.stream, b"not a sealed frame")
        .await
        .unwrap();
    assert!(client.recv_or_eof().await.is_none());
    wait_until_offline(&h.state, user_id).await;
}

#[tokio::test]
async fn pushes_reach_the_peer_connection() {
    let h = harness();
    let addr = start_server(Arc::clone(&h.state)).await;

    let mut alice = WireClient::connect(addr).await;
    let mut bob = WireClient::connect(addr).await;

    for (client, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
        client
            .send(&Request::Register {
                username: name.into(),
                password: password_for(name),
                email: None,
            })
            .await;
        client.recv().await;
        client
            .send(&Request::Login {
                username: name.into(),
                password: password_for(name),
            })
            .await;
        client.recv().await;
    }

    // alice's friend request arrives at bob as an unsolicited push.
    alice
        .send(&Request::SearchUser {
            query: "bob".into(),
        })
        .await;
    let bob_id = alice.recv().await["data"]["id"].as_i64().unwrap();

    alice.send(&Request::AddFriend { friend_id: bob_id }).await;
    let resp = alice.recv().await;
    assert_eq!(resp["status"], "success");

    let push = bob.recv().await;
    assert_eq!(push["type"], "refresh_friend_requests");
}
