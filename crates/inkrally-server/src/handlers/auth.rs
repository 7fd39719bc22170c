//! Account lifecycle: register, login, password reset by email code, and
//! profile updates.

use std::time::{Duration, Instant};

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use inkrally_protocol::message::{CurrentGroup, LoginData, Response, Status};
use rand::Rng;

use crate::avatars;
use crate::db;
use crate::registry::SessionHandle;
use crate::server_state::{PendingCode, ServerState};
use crate::session::{AuthedUser, ConnContext};
use crate::store::{self, StoreError};

/// Verification codes expire after ten minutes.
const CODE_TTL: Duration = Duration::from_secs(600);

pub fn register(
    state: &ServerState,
    username: &str,
    password: &str,
    email: Option<&str>,
) -> Result<Response, StoreError> {
    if username.is_empty() || password.is_empty() {
        return Ok(Response::Register {
            status: Status::Fail,
            msg: "invalid_credentials".into(),
        });
    }

    let Ok(hash) = hash_credential(password) else {
        tracing::error!(user = %username, "credential hashing failed");
        return Ok(Response::Register {
            status: Status::Error,
            msg: "internal_error".into(),
        });
    };

    let email = email.map(str::trim).filter(|e| !e.is_empty());
    let conn = db::lock(&state.db);
    match store::insert_user(&conn, username, &hash, email, store::timestamp_now()) {
        Ok(user_id) => {
            tracing::info!(user = %username, id = user_id, "registered");
            Ok(Response::Register {
                status: Status::Success,
                msg: "registered".into(),
            })
        }
        Err(StoreError::Conflict(kind)) => Ok(Response::Register {
            status: Status::Fail,
            msg: kind.into(),
        }),
        Err(e) => Err(e),
    }
}

pub fn login(
    state: &ServerState,
    conn_ctx: &mut ConnContext,
    username: &str,
    password: &str,
) -> Result<Response, StoreError> {
    let fail = |msg: &str| Response::Login {
        status: Status::Fail,
        msg: Some(msg.into()),
        data: None,
    };

    let data = {
        let conn = db::lock(&state.db);
        let Some(user) = store::user_by_username(&conn, username)? else {
            return Ok(fail("user_not_found"));
        };

        match verify_credential(&user.password_hash, password) {
            CredentialCheck::Mismatch => return Ok(fail("wrong_password")),
            CredentialCheck::Valid => {}
            CredentialCheck::ValidLegacy => {
                // Pre-KDF row: rewrite the credential with Argon2 now.
                if let Ok(new_hash) = hash_credential(password) {
                    store::update_password(&conn, user.id, &new_hash)?;
                    tracing::info!(user = %username, "migrated legacy credential to argon2");
                }
            }
        }

        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
        let today_total = store::daily_total(&conn, user.id, &today)?;
        let current_group = match store::membership_group_of(&conn, user.id)? {
            Some(group_id) => store::group_by_id(&conn, group_id)?.map(|g| CurrentGroup {
                id: g.id,
                name: g.name,
                owner_id: g.owner_id,
            }),
            None => None,
        };
        let avatar_data = avatars::load_avatar_b64(&state.avatar_dir, user.avatar_file.as_deref());

        LoginData {
            user_id: user.id,
            username: user.username,
            nickname: user.nickname,
            email: user.email.unwrap_or_default(),
            signature: user.signature,
            avatar_data,
            today_total,
            current_group,
        }
    };

    conn_ctx.authed = Some(AuthedUser {
        user_id: data.user_id,
        username: data.username.clone(),
    });
    state.registry.attach(
        data.user_id,
        SessionHandle::new(conn_ctx.session_id, conn_ctx.tx.clone()),
    );
    tracing::info!(user = %data.username, id = data.user_id, "logged in");

    Ok(Response::Login {
        status: Status::Success,
        msg: None,
        data: Some(Box::new(data)),
    })
}

pub fn send_code(state: &ServerState, username: &str) -> Result<Response, StoreError> {
    let fail = |msg: &str| Response::Code {
        status: Status::Fail,
        msg: msg.into(),
    };

    let email = {
        let conn = db::lock(&state.db);
        match store::user_by_username(&conn, username)? {
            Some(user) => match user.email.filter(|e| !e.is_empty()) {
                Some(email) => email,
                None => return Ok(fail("no_email_on_file")),
            },
            None => return Ok(fail("no_email_on_file")),
        }
    };

    let code = rand::thread_rng().gen_range(100_000..1_000_000).to_string();

    // The mail side effect runs outside every lock. A failed send leaves no
    // code behind.
    if state.mailer.send_verification_code(&email, &code) {
        state.codes.lock().insert(
            username.to_string(),
            PendingCode {
                code,
                issued_at: Instant::now(),
            },
        );
        Ok(Response::Code {
            status: Status::Success,
            msg: "sent".into(),
        })
    } else {
        state.codes.lock().remove(username);
        tracing::warn!(user = %username, "verification code delivery failed");
        Ok(fail("send_failed"))
    }
}

pub fn reset_password(
    state: &ServerState,
    username: &str,
    code: &str,
    new_password: &str,
) -> Result<Response, StoreError> {
    let fail = |msg: &str| Response::Reset {
        status: Status::Fail,
        msg: msg.into(),
    };

    {
        let codes = state.codes.lock();
        let Some(pending) = codes.get(username) else {
            return Ok(fail("invalid_or_expired_code"));
        };
        if pending.issued_at.elapsed() > CODE_TTL || pending.code != code {
            return Ok(fail("invalid_or_expired_code"));
        }
    }

    let Ok(hash) = hash_credential(new_password) else {
        tracing::error!(user = %username, "credential hashing failed");
        return Ok(Response::Reset {
            status: Status::Error,
            msg: "internal_error".into(),
        });
    };

    {
        let conn = db::lock(&state.db);
        let Some(user) = store::user_by_username(&conn, username)? else {
            return Ok(fail("user_not_found"));
        };
        store::update_password(&conn, user.id, &hash)?;
    }

    // Consume the code only after the credential is rewritten.
    state.codes.lock().remove(username);
    tracing::info!(user = %username, "password reset");
    Ok(Response::Reset {
        status: Status::Success,
        msg: "reset".into(),
    })
}

pub fn update_profile(
    state: &ServerState,
    user: &AuthedUser,
    nickname: Option<&str>,
    email: Option<&str>,
    signature: Option<&str>,
    avatar_data: Option<&str>,
) -> Result<Response, StoreError> {
    let avatar_file = match avatar_data.filter(|d| !d.is_empty()) {
        Some(b64) => match avatars::store_avatar(&state.avatar_dir, user.user_id, b64) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(error = %e, user = user.user_id, "avatar write failed");
                return Ok(Response::generic(
                    Status::Error,
                    Some("avatar_write_failed".into()),
                ));
            }
        },
        None => None,
    };

    let conn = db::lock(&state.db);
    match store::update_profile_fields(
        &conn,
        user.user_id,
        nickname,
        email,
        signature,
        avatar_file.as_deref(),
    ) {
        Ok(()) => Ok(Response::ProfileUpdated {
            status: Status::Success,
        }),
        Err(StoreError::Conflict(kind)) => Ok(Response::generic(Status::Fail, Some(kind.into()))),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Credential hashing
// ---------------------------------------------------------------------------

enum CredentialCheck {
    Valid,
    /// Stored value predates the server-side KDF; valid by direct compare.
    ValidLegacy,
    Mismatch,
}

/// The client pre-hashes its password; the server treats that as an opaque
/// credential and runs it through Argon2id before storage.
fn hash_credential(credential: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(credential.as_bytes(), &salt)?
        .to_string())
}

fn verify_credential(stored: &str, supplied: &str) -> CredentialCheck {
    match PasswordHash::new(stored) {
        Ok(parsed) => {
            if Argon2::default()
                .verify_password(supplied.as_bytes(), &parsed)
                .is_ok()
            {
                CredentialCheck::Valid
            } else {
                CredentialCheck::Mismatch
            }
        }
        // Rows written before the KDF hold the client credential verbatim.
        Err(_) => {
            if stored == supplied {
                CredentialCheck::ValidLegacy
            } else {
                CredentialCheck::Mismatch
            }
        }
    }
}
