//! Account lifecycle: register, login, credential storage, password reset
//! by emailed code, and profile updates.

mod support;

use std::time::{Duration, Instant};

use inkrally_protocol::message::{Request, Response, Status};
use inkrally_server::{db, store};
use support::{connect, harness, login, password_for, register, signup};

#[test]
fn register_then_login_succeeds() {
    let h = harness();
    let mut alice = connect(&h.state);

    register(&h.state, &mut alice, "alice", None);
    let resp = alice.request(
        &h.state,
        Request::Login {
            username: "alice".into(),
            password: password_for("alice"),
        },
    );

    match resp {
        Some(Response::Login {
            status: Status::Success,
            data: Some(data),
            ..
        }) => {
            assert_eq!(data.username, "alice");
            // Nickname defaults to the username.
            assert_eq!(data.nickname, "alice");
            assert_eq!(data.today_total, 0);
            assert!(data.current_group.is_none());
            assert!(data.avatar_data.is_empty());
        }
        other => panic!("unexpected login response: {other:?}"),
    }
    assert!(h.state.registry.is_online(alice.ctx.authed.as_ref().unwrap().user_id));
}

#[test]
fn login_with_wrong_password_fails() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", None);

    let resp = alice.request(
        &h.state,
        Request::Login {
            username: "alice".into(),
            password: "wrong".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Fail,
            data: None,
            ..
        })
    ));
    assert!(alice.ctx.authed.is_none());
}

#[test]
fn login_unknown_user_fails() {
    let h = harness();
    let mut client = connect(&h.state);

    let resp = client.request(
        &h.state,
        Request::Login {
            username: "nobody".into(),
            password: "h".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Fail,
            ..
        })
    ));
}

#[test]
fn duplicate_username_rejected() {
    let h = harness();
    let mut first = connect(&h.state);
    register(&h.state, &mut first, "alice", None);

    let mut second = connect(&h.state);
    let resp = second.request(
        &h.state,
        Request::Register {
            username: "alice".into(),
            password: "other".into(),
            email: None,
        },
    );
    match resp {
        Some(Response::Register {
            status: Status::Fail,
            msg,
        }) => assert_eq!(msg, "username_taken"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn stored_credential_is_hashed_server_side() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", None);

    let conn = db::lock(&h.state.db);
    let user = store::user_by_username(&conn, "alice").unwrap().unwrap();
    assert_ne!(user.password_hash, password_for("alice"));
    assert!(user.password_hash.starts_with("$argon2"));
}

#[test]
fn legacy_credential_migrates_on_login() {
    let h = harness();
    // A row written before the server-side KDF: credential stored verbatim.
    {
        let conn = db::lock(&h.state.db);
        store::insert_user(&conn, "vintage", "legacy-opaque-hash", None, 0).unwrap();
    }

    let mut client = connect(&h.state);
    let resp = client.request(
        &h.state,
        Request::Login {
            username: "vintage".into(),
            password: "legacy-opaque-hash".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Success,
            ..
        })
    ));

    {
        let conn = db::lock(&h.state.db);
        let user = store::user_by_username(&conn, "vintage").unwrap().unwrap();
        assert!(user.password_hash.starts_with("$argon2"));
    }

    // The migrated credential still authenticates.
    let mut again = connect(&h.state);
    let resp = again.request(
        &h.state,
        Request::Login {
            username: "vintage".into(),
            password: "legacy-opaque-hash".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Success,
            ..
        })
    ));
}

#[test]
fn send_code_without_email_fails() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", None);

    let resp = alice.request(
        &h.state,
        Request::SendCode {
            username: "alice".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Code {
            status: Status::Fail,
            ..
        })
    ));
    assert!(h.mailer.sent.lock().is_empty());
}

#[test]
fn reset_password_happy_path_consumes_the_code() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", Some("alice@example.com"));

    let resp = alice.request(
        &h.state,
        Request::SendCode {
            username: "alice".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Code {
            status: Status::Success,
            ..
        })
    ));
    let code = h.mailer.last_code().expect("code delivered");
    assert_eq!(code.len(), 6);

    let resp = alice.request(
        &h.state,
        Request::ResetPassword {
            username: "alice".into(),
            code: code.clone(),
            new_password: "new-credential".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Reset {
            status: Status::Success,
            ..
        })
    ));

    // New credential works, old one does not.
    let mut fresh = connect(&h.state);
    let resp = fresh.request(
        &h.state,
        Request::Login {
            username: "alice".into(),
            password: "new-credential".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Success,
            ..
        })
    ));
    let mut stale = connect(&h.state);
    let resp = stale.request(
        &h.state,
        Request::Login {
            username: "alice".into(),
            password: password_for("alice"),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Login {
            status: Status::Fail,
            ..
        })
    ));

    // The code was consumed; replaying it fails.
    let resp = fresh.request(
        &h.state,
        Request::ResetPassword {
            username: "alice".into(),
            code,
            new_password: "another".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Reset {
            status: Status::Fail,
            ..
        })
    ));
}

#[test]
fn failed_mail_send_leaves_no_code() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", Some("alice@example.com"));

    h.mailer.fail_sends();
    let resp = alice.request(
        &h.state,
        Request::SendCode {
            username: "alice".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Code {
            status: Status::Fail,
            ..
        })
    ));
    assert!(h.state.codes.lock().is_empty());
}

#[test]
fn expired_code_rejected() {
    let h = harness();
    let mut alice = connect(&h.state);
    register(&h.state, &mut alice, "alice", Some("alice@example.com"));

    alice.request(
        &h.state,
        Request::SendCode {
            username: "alice".into(),
        },
    );
    let code = h.mailer.last_code().unwrap();

    // Back-date the issue time past the ten-minute TTL.
    {
        let mut codes = h.state.codes.lock();
        let pending = codes.get_mut("alice").unwrap();
        pending.issued_at = Instant::now()
            .checked_sub(Duration::from_secs(601))
            .expect("clock supports back-dating");
    }

    let resp = alice.request(
        &h.state,
        Request::ResetPassword {
            username: "alice".into(),
            code,
            new_password: "newer".into(),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::Reset {
            status: Status::Fail,
            ..
        })
    ));
}

#[test]
fn update_profile_is_partial_and_persists() {
    let h = harness();
    let mut alice = connect(&h.state);
    signup(&h.state, &mut alice, "alice");

    let resp = alice.request(
        &h.state,
        Request::UpdateProfile {
            nickname: Some("Quilldriver".into()),
            email: None,
            signature: Some("two hundred words before coffee".into()),
            avatar_data: None,
        },
    );
    assert!(matches!(
        resp,
        Some(Response::ProfileUpdated {
            status: Status::Success
        })
    ));

    // Exact-match search finds the new nickname; the username is untouched.
    let resp = alice.request(
        &h.state,
        Request::SearchUser {
            query: "Quilldriver".into(),
        },
    );
    match resp {
        Some(Response::SearchUser {
            status: Status::Success,
            data: Some(found),
            ..
        }) => {
            assert_eq!(found.username, "alice");
            assert_eq!(found.signature, "two hundred words before coffee");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn avatar_roundtrips_as_base64() {
    use base64::Engine as _;

    let h = harness();
    let mut alice = connect(&h.state);
    signup(&h.state, &mut alice, "alice");

    let blob = base64::engine::general_purpose::STANDARD.encode(b"png-ish bytes");
    let resp = alice.request(
        &h.state,
        Request::UpdateProfile {
            nickname: None,
            email: None,
            signature: None,
            avatar_data: Some(blob.clone()),
        },
    );
    assert!(matches!(
        resp,
        Some(Response::ProfileUpdated {
            status: Status::Success
        })
    ));

    // A fresh login echoes the stored blob back.
    let mut fresh = connect(&h.state);
    match fresh.request(
        &h.state,
        Request::Login {
            username: "alice".into(),
            password: password_for("alice"),
        },
    ) {
        Some(Response::Login {
            data: Some(data), ..
        }) => assert_eq!(data.avatar_data, blob),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn authenticated_frames_require_login() {
    let h = harness();
    let mut client = connect(&h.state);

    let resp = client.request(&h.state, Request::GetFriends);
    match resp {
        Some(Response::Generic {
            status: Status::Error,
            msg: Some(msg),
        }) => assert_eq!(msg, "not_logged_in"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn unknown_frame_type_gets_a_generic_ack() {
    let h = harness();
    let mut client = connect(&h.state);

    let resp = client.request(&h.state, Request::Unknown);
    assert!(matches!(
        resp,
        Some(Response::Generic {
            status: Status::Ok,
            ..
        })
    ));
}

#[test]
fn second_login_replaces_the_first_session() {
    let h = harness();
    let mut first = connect(&h.state);
    let alice_id = signup(&h.state, &mut first, "alice");

    let mut second = connect(&h.state);
    login(&h.state, &mut second, "alice");

    // Pushes now land on the second connection only.
    h.state
        .registry
        .send(alice_id, &inkrally_protocol::Push::RefreshFriends);
    assert!(first.pushes().is_empty());
    assert_eq!(second.pushes().len(), 1);

    // The stale session's teardown must not evict the live one.
    h.state.registry.detach(alice_id, first.ctx.session_id);
    assert!(h.state.registry.is_online(alice_id));
}
