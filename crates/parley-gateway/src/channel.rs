use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task;
use tracing::{error, info, warn};

use parley_crypto::{encrypt, password};
use parley_db::{Database, unique_violation};
use parley_types::error::ChatError;
use parley_types::events::{ChannelCommand, ChannelEvent, ResponseStatus};

use crate::dispatcher::{ConnId, Dispatcher};
use crate::presence::Presence;
use crate::session::{Session, SessionState};
use crate::throttle::{Decision, LoginThrottle};

/// Author name used for join/leave notices.
const SYSTEM_USER: &str = "SYSTEM";

/// Shared state for the channel (broadcast) gateway. Constructed once at
/// server start and cloned per connection.
#[derive(Clone)]
pub struct ChannelGateway {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub presence: Presence,
    pub throttle: Arc<LoginThrottle>,
    /// At-rest key for channel content.
    pub key: [u8; 32],
}

/// Why a login attempt was rejected. Carries what the client-facing
/// response needs; the credential/throttle details never leave this type.
#[derive(Debug)]
pub enum LoginRejection {
    Locked { remaining_secs: u64 },
    BadCredentials { banned: bool, remaining_attempts: u32 },
}

/// Handle one channel WebSocket connection. The connection starts
/// anonymous; login and registration arrive as socket commands, gated by
/// the throttle keyed on the peer address.
pub async fn handle_connection(socket: WebSocket, addr: SocketAddr, gateway: ChannelGateway) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (conn_id, mut conn_rx) = gateway.dispatcher.register().await;
    let mut broadcast_rx = gateway.dispatcher.subscribe();

    info!("channel connection {} from {}", conn_id, addr);

    // Shared between the send and recv tasks: broadcasts are only forwarded
    // once the connection is authenticated, and cleanup needs the identity
    // whichever task ends first.
    let authenticated = Arc::new(AtomicBool::new(false));
    let identity: Arc<std::sync::RwLock<Option<String>>> = Arc::new(std::sync::RwLock::new(None));

    let authed_send = authenticated.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("channel broadcast receiver lagged by {} frames", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    // The implicit room is "all authenticated connections".
                    if !authed_send.load(Ordering::Acquire) {
                        continue;
                    }
                    if frame.skip == Some(conn_id) {
                        continue;
                    }
                    if ws_tx.send(Message::Text(frame.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = conn_rx.recv() => {
                    let json = match result {
                        Some(json) => json,
                        None => break,
                    };
                    if ws_tx.send(Message::Text(json.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let gateway_recv = gateway.clone();
    let authed_recv = authenticated.clone();
    let identity_recv = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut session = Session::new();
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChannelCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &gateway_recv,
                            conn_id,
                            addr,
                            &mut session,
                            &authed_recv,
                            &identity_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "channel {} bad payload: {} -- raw: {}",
                            conn_id,
                            e,
                            crate::payload_preview(&text)
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        session.close();
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.dispatcher.unregister(conn_id).await;

    let user = identity.read().expect("identity lock poisoned").clone();
    if let Some(user) = user {
        if gateway.presence.mark_offline(&user).await {
            gateway.dispatcher.broadcast(&ChannelEvent::Message {
                user: SYSTEM_USER.to_string(),
                body: format!("{} has left the channel.", user),
                time: String::new(),
            });
        }
        info!("{} disconnected from channel", user);
    }
}

async fn handle_command(
    gateway: &ChannelGateway,
    conn_id: ConnId,
    addr: SocketAddr,
    session: &mut Session,
    authenticated: &AtomicBool,
    identity: &std::sync::RwLock<Option<String>>,
    cmd: ChannelCommand,
) {
    match cmd {
        ChannelCommand::Login { user, pass } => {
            if !matches!(session.state(), SessionState::Anonymous) {
                warn!("channel {} login while not anonymous, ignoring", conn_id);
                return;
            }
            if session.begin_auth().is_err() {
                return;
            }

            let source = addr.ip().to_string();
            let db = gateway.db.clone();
            let throttle = gateway.throttle.clone();
            let attempt_user = user.clone();

            // Credential verification is intentionally expensive; run the
            // whole attempt off the async runtime.
            let result = task::spawn_blocking(move || {
                verify_channel_login(&db, &throttle, &source, &attempt_user, &pass)
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    if session.complete_auth(user.clone()).is_err() {
                        return;
                    }
                    *identity.write().expect("identity lock poisoned") = Some(user.clone());
                    authenticated.store(true, Ordering::Release);

                    gateway
                        .dispatcher
                        .send_to(
                            conn_id,
                            &ChannelEvent::LoginResponse {
                                status: ResponseStatus::Success,
                                msg: None,
                            },
                        )
                        .await;

                    if gateway.presence.mark_online(&user).await {
                        gateway.dispatcher.broadcast(&ChannelEvent::Message {
                            user: SYSTEM_USER.to_string(),
                            body: format!("{} has joined.", user),
                            time: String::new(),
                        });
                    }

                    info!("{} logged into channel from {}", user, addr);
                    replay_history(gateway, conn_id).await;
                }
                Ok(Err(rejection)) => {
                    let msg = match rejection {
                        LoginRejection::Locked { remaining_secs } => {
                            format!("Locked out. Try again in {}s.", remaining_secs)
                        }
                        LoginRejection::BadCredentials { banned: true, .. } => {
                            "Too many failed attempts. Locked out for 30s.".to_string()
                        }
                        LoginRejection::BadCredentials {
                            remaining_attempts, ..
                        } => {
                            format!("Invalid credentials. {} attempts left.", remaining_attempts)
                        }
                    };
                    gateway
                        .dispatcher
                        .send_to(
                            conn_id,
                            &ChannelEvent::LoginResponse {
                                status: ResponseStatus::Fail,
                                msg: Some(msg),
                            },
                        )
                        .await;
                    let _ = session.fail_auth();
                }
                Err(e) => {
                    error!("login task failed: {}", e);
                    gateway
                        .dispatcher
                        .send_to(
                            conn_id,
                            &ChannelEvent::LoginResponse {
                                status: ResponseStatus::Fail,
                                msg: Some("Internal error.".to_string()),
                            },
                        )
                        .await;
                    let _ = session.fail_auth();
                }
            }
        }

        ChannelCommand::Register { user, pass } => {
            if !matches!(session.state(), SessionState::Anonymous) {
                warn!("channel {} register while not anonymous, ignoring", conn_id);
                return;
            }

            let db = gateway.db.clone();
            let reg_user = user.clone();
            let result =
                task::spawn_blocking(move || register_channel_user(&db, &reg_user, &pass)).await;

            let (status, msg) = match result {
                Ok(Ok(())) => {
                    info!("channel account registered: {}", user);
                    (
                        ResponseStatus::Success,
                        "Registration successful.".to_string(),
                    )
                }
                Ok(Err(ChatError::UsernameTaken)) => {
                    (ResponseStatus::Fail, ChatError::UsernameTaken.to_string())
                }
                Ok(Err(e)) => (ResponseStatus::Fail, e.to_string()),
                Err(e) => {
                    error!("register task failed: {}", e);
                    (ResponseStatus::Fail, "Internal error.".to_string())
                }
            };

            gateway
                .dispatcher
                .send_to(
                    conn_id,
                    &ChannelEvent::RegisterResponse {
                        status,
                        msg: Some(msg),
                    },
                )
                .await;
        }

        ChannelCommand::Message { body } => {
            let Some(user) = session.identity().map(str::to_string) else {
                warn!("channel {} message before login, ignoring", conn_id);
                return;
            };
            if body.trim().is_empty() {
                return;
            }

            let (ciphertext, nonce) = match encrypt::seal_content(&gateway.key, body.as_bytes()) {
                Ok(sealed) => sealed,
                Err(e) => {
                    error!("failed to seal channel message: {}", e);
                    return;
                }
            };

            let time = chrono::Utc::now().to_rfc3339();
            let db = gateway.db.clone();
            let author = user.clone();
            let stored_time = time.clone();
            let stored = task::spawn_blocking(move || {
                db.append_channel_message(&author, &ciphertext, &nonce, &stored_time)
            })
            .await;

            match stored {
                Ok(Ok(_id)) => {
                    gateway
                        .dispatcher
                        .broadcast(&ChannelEvent::Message { user, body, time });
                }
                Ok(Err(e)) => error!("failed to persist channel message: {}", e),
                Err(e) => error!("append task failed: {}", e),
            }
        }

        ChannelCommand::Typing => {
            let Some(user) = session.identity().map(str::to_string) else {
                return;
            };
            gateway
                .dispatcher
                .broadcast_excluding(conn_id, &ChannelEvent::DisplayTyping { user });
        }
    }
}

/// One throttled login attempt: throttle check, credential verification,
/// counter bookkeeping. Blocking (argon2 + SQLite); callers wrap it in
/// `spawn_blocking`.
pub fn verify_channel_login(
    db: &Database,
    throttle: &LoginThrottle,
    source: &str,
    username: &str,
    pass: &str,
) -> Result<(), LoginRejection> {
    if let Decision::Locked { remaining_secs } = throttle.check(source) {
        return Err(LoginRejection::Locked { remaining_secs });
    }

    let verified = match db.get_channel_user(username) {
        Ok(Some(row)) => password::verify_password(pass, &row.password).unwrap_or_else(|e| {
            error!("stored digest for {} is malformed: {}", username, e);
            false
        }),
        Ok(None) => false,
        Err(e) => {
            error!("credential lookup failed for {}: {}", username, e);
            false
        }
    };

    if verified {
        throttle.record_success(source);
        Ok(())
    } else {
        let outcome = throttle.record_failure(source);
        Err(LoginRejection::BadCredentials {
            banned: outcome.banned,
            remaining_attempts: outcome.remaining_attempts,
        })
    }
}

/// Create a channel account. Duplicate usernames map to `UsernameTaken`;
/// the first credential row is never touched.
pub fn register_channel_user(db: &Database, username: &str, pass: &str) -> Result<(), ChatError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ChatError::InvalidCredentials);
    }
    if pass.len() < 8 {
        return Err(ChatError::InvalidCredentials);
    }

    let digest = password::hash_password(pass)?;
    match db.create_channel_user(username, &digest) {
        Ok(()) => Ok(()),
        Err(e) if unique_violation(&e) => Err(ChatError::UsernameTaken),
        Err(e) => Err(ChatError::Internal(e)),
    }
}

/// Replay the full channel history to a freshly authenticated connection.
/// Rows that fail decryption are skipped so one corrupt row never blocks
/// the rest of the load.
async fn replay_history(gateway: &ChannelGateway, conn_id: ConnId) {
    let db = gateway.db.clone();
    let rows = match task::spawn_blocking(move || db.channel_history()).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            error!("history load failed: {}", e);
            return;
        }
        Err(e) => {
            error!("history task failed: {}", e);
            return;
        }
    };

    for row in rows {
        let body = match encrypt::open_content(&gateway.key, &row.ciphertext, &row.nonce) {
            Ok(plain) => match String::from_utf8(plain) {
                Ok(body) => body,
                Err(_) => {
                    warn!("skipping channel message {}: not valid UTF-8", row.id);
                    continue;
                }
            },
            Err(_) => {
                warn!("skipping channel message {}: undecryptable", row.id);
                continue;
            }
        };

        gateway
            .dispatcher
            .send_to(
                conn_id,
                &ChannelEvent::Message {
                    user: row.username,
                    body,
                    time: row.created_at,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let digest = password::hash_password("correct horse").unwrap();
        db.create_channel_user("alice", &digest).unwrap();
        db
    }

    #[test]
    fn lockout_scenario_then_recovery() {
        let db = seeded_db();
        // Short window so the test can outlive it.
        let throttle = LoginThrottle::with_policy(3, Duration::from_millis(150));
        let source = "203.0.113.7";

        // Three wrong passwords.
        for expected_left in [2u32, 1] {
            match verify_channel_login(&db, &throttle, source, "alice", "wrong") {
                Err(LoginRejection::BadCredentials {
                    banned,
                    remaining_attempts,
                }) => {
                    assert!(!banned);
                    assert_eq!(remaining_attempts, expected_left);
                }
                other => panic!("expected credential rejection, got {:?}", other),
            }
        }
        match verify_channel_login(&db, &throttle, source, "alice", "wrong") {
            Err(LoginRejection::BadCredentials { banned, .. }) => assert!(banned),
            other => panic!("expected banning rejection, got {:?}", other),
        }

        // Fourth attempt inside the window is rejected even with the right
        // password, citing at least one remaining second.
        match verify_channel_login(&db, &throttle, source, "alice", "correct horse") {
            Err(LoginRejection::Locked { remaining_secs }) => {
                assert!((1..=30).contains(&remaining_secs));
            }
            other => panic!("expected lockout, got {:?}", other),
        }

        // After the window elapses, a correct login succeeds and clears the
        // record.
        std::thread::sleep(Duration::from_millis(200));
        verify_channel_login(&db, &throttle, source, "alice", "correct horse").unwrap();

        // A later failure counts from 1 again.
        match verify_channel_login(&db, &throttle, source, "alice", "wrong") {
            Err(LoginRejection::BadCredentials {
                remaining_attempts, ..
            }) => assert_eq!(remaining_attempts, 2),
            other => panic!("expected credential rejection, got {:?}", other),
        }
    }

    #[test]
    fn unknown_user_counts_as_failure() {
        let db = seeded_db();
        let throttle = LoginThrottle::new();

        match verify_channel_login(&db, &throttle, "198.51.100.1", "mallory", "whatever") {
            Err(LoginRejection::BadCredentials {
                remaining_attempts, ..
            }) => assert_eq!(remaining_attempts, 2),
            other => panic!("expected credential rejection, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_registration_reports_username_taken() {
        let db = Database::open_in_memory().unwrap();
        register_channel_user(&db, "alice", "long enough password").unwrap();

        match register_channel_user(&db, "alice", "another password") {
            Err(ChatError::UsernameTaken) => {}
            other => panic!("expected UsernameTaken, got {:?}", other.err()),
        }
    }

    #[test]
    fn registration_validates_input() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            register_channel_user(&db, "ab", "long enough password"),
            Err(ChatError::InvalidCredentials)
        ));
        assert!(matches!(
            register_channel_user(&db, "alice", "short"),
            Err(ChatError::InvalidCredentials)
        ));
    }
}
