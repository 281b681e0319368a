use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task;
use tracing::{error, info, warn};

use parley_db::Database;
use parley_types::events::{DirectCommand, DirectEvent, PresenceStatus};

use crate::dispatcher::{ConnId, Dispatcher};
use crate::presence::Presence;
use crate::rooms::pair_key;

/// Shared state for the direct (1:1) gateway.
#[derive(Clone)]
pub struct DirectGateway {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub presence: Presence,
}

/// Handle one direct WebSocket connection. The JWT was validated at the
/// HTTP upgrade, so the connection arrives already bound to `username`.
pub async fn handle_connection(socket: WebSocket, username: String, gateway: DirectGateway) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (conn_id, mut conn_rx) = gateway.dispatcher.register().await;
    let mut broadcast_rx = gateway.dispatcher.subscribe();

    info!("{} connected to direct gateway ({})", username, conn_id);

    // Presence edge: only the first connection for an identity announces it.
    if gateway.presence.mark_online(&username).await {
        gateway.dispatcher.broadcast(&DirectEvent::StatusChange {
            user: username.clone(),
            status: PresenceStatus::Online,
        });
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("direct broadcast receiver lagged by {} frames", n);
                            continue;
                        }
                        Err(_) => break,
                    };
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
    let sender = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<DirectCommand>(&text) {
                    Ok(cmd) => handle_command(&gateway_recv, conn_id, &sender, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad direct payload: {} -- raw: {}",
                            sender,
                            e,
                            crate::payload_preview(&text)
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.dispatcher.unregister(conn_id).await;

    if gateway.presence.mark_offline(&username).await {
        gateway.dispatcher.broadcast(&DirectEvent::StatusChange {
            user: username.clone(),
            status: PresenceStatus::Offline,
        });
    }
    info!("{} disconnected from direct gateway", username);
}

async fn handle_command(
    gateway: &DirectGateway,
    conn_id: ConnId,
    sender: &str,
    cmd: DirectCommand,
) {
    match cmd {
        DirectCommand::JoinPrivate { partner } => {
            let room = pair_key(sender, &partner);
            gateway.dispatcher.join_room(&room, conn_id).await;
        }

        DirectCommand::Message {
            recipient,
            body,
            kind,
        } => {
            if body.trim().is_empty() {
                return;
            }
            if recipient == sender {
                warn!("{} tried to message themselves, ignoring", sender);
                return;
            }

            let timestamp = unix_now();
            let db = gateway.db.clone();
            let stored_sender = sender.to_string();
            let stored_recipient = recipient.clone();
            let stored_body = body.clone();
            let stored = task::spawn_blocking(move || {
                db.append_direct_message(
                    &stored_sender,
                    &stored_recipient,
                    &stored_body,
                    kind.as_str(),
                    timestamp,
                )
            })
            .await;

            match stored {
                Ok(Ok(_id)) => {
                    // Fire-and-forget delivery: whoever currently subscribes
                    // to the pair room hears it; everyone else catches up
                    // from history.
                    let room = pair_key(sender, &recipient);
                    gateway
                        .dispatcher
                        .publish_room(
                            &room,
                            &DirectEvent::NewMessage {
                                sender: sender.to_string(),
                                recipient,
                                body,
                                kind,
                                timestamp,
                            },
                        )
                        .await;
                }
                Ok(Err(e)) => error!("failed to persist direct message: {}", e),
                Err(e) => error!("append task failed: {}", e),
            }
        }

        DirectCommand::Typing { recipient } => {
            let room = pair_key(sender, &recipient);
            gateway
                .dispatcher
                .publish_room(
                    &room,
                    &DirectEvent::IsTyping {
                        sender: sender.to_string(),
                        recipient,
                    },
                )
                .await;
        }
    }
}

/// Unix seconds with fractional part, matching the direct schema's REAL
/// timestamp column.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
