//! WebSocket edge: one task per socket, subscribed to its room's event
//! channel. Inbound frames go through the dispatcher; outbound traffic is
//! the union of direct responses, direct sends, and per-viewer translations
//! of room events.

pub mod dispatch;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::app::AppState;
use crate::error::GameError;
use crate::protocol::{ClientMessage, RoomEvent, ServerMessage};
use crate::roles;
use crate::store::room_channel;
use crate::types::{new_id, Phase, RoomState};
use crate::view::render_view;
use dispatch::ConnCtx;

const MAX_WS_MESSAGE_BYTES: usize = 32 * 1024;

/// Helper to serialize and send a message over WebSocket.
async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &T,
) -> Result<(), ()> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.map_err(|_| ()),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            Ok(())
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, app: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let socket_id = new_id();
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<ServerMessage>();
    app.register_socket(&socket_id, direct_tx).await;

    let mut conn = ConnCtx::new(socket_id.clone());
    let mut room_rx: Option<broadcast::Receiver<String>> = None;
    let mut subscribed_room: Option<String> = None;

    tracing::debug!(socket = %socket_id, "websocket connected");

    'outer: loop {
        tokio::select! {
            // Direct sends from other tasks (evictions, nudges).
            direct = direct_rx.recv() => {
                let Some(msg) = direct else { break };
                let evicted = matches!(msg, ServerMessage::SessionEvicted { .. });
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
                if evicted {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            // Room events for the joined room.
            event = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Ok(payload) => {
                        let (messages, close) = translate_event(&payload, &mut conn);
                        for msg in messages {
                            if send_json(&mut sender, &msg).await.is_err() {
                                break 'outer;
                            }
                        }
                        if close {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(socket = %socket_id, skipped, "subscriber lagged, resyncing");
                        // Resync from the store so the client is not left on
                        // a stale snapshot.
                        if let Some(msg) = resync_snapshot(&app, &mut conn).await {
                            if send_json(&mut sender, &msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        room_rx = None;
                    }
                }
            }

            // Inbound frames.
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_WS_MESSAGE_BYTES {
                            let err = GameError::Unauthorized("invalid request format".into());
                            let _ = send_json(&mut sender, &ServerMessage::error(&err)).await;
                            continue;
                        }
                        let responses = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                dispatch::handle_message(&app, &mut conn, client_msg).await
                            }
                            Err(e) => {
                                tracing::debug!(socket = %socket_id, error = %e, "bad frame");
                                let err = GameError::Unauthorized("invalid request format".into());
                                vec![ServerMessage::error(&err)]
                            }
                        };
                        for msg in responses {
                            if send_json(&mut sender, &msg).await.is_err() {
                                break 'outer;
                            }
                        }
                        // A create/join/resume binds the connection to a room;
                        // follow it with a subscription.
                        if conn.room_id != subscribed_room {
                            if let Some(room_id) = conn.room_id.clone() {
                                room_rx = Some(app.kv.subscribe(&room_channel(&room_id)).await);
                                subscribed_room = Some(room_id);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(socket = %socket_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    app.unregister_socket(&socket_id).await;
    mark_disconnected(&app, &conn).await;
    tracing::debug!(socket = %socket_id, "websocket closed");
}

/// Translate a published room event into the messages this viewer should
/// see. Returns the messages and whether the connection must close.
fn translate_event(payload: &str, conn: &mut ConnCtx) -> (Vec<ServerMessage>, bool) {
    let event: RoomEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(error = %err, "undecodable room event");
            return (vec![], false);
        }
    };
    let Some(viewer) = conn.player_id.clone() else {
        return (vec![], false);
    };

    match event {
        RoomEvent::Committed { state } => {
            let state: RoomState = *state;
            let msg = match render_view(&state, &viewer) {
                Ok(view) => Some(ServerMessage::RoomSnapshot {
                    view: Box::new(view),
                    jwt: None,
                    session_id: None,
                }),
                Err(err) => {
                    tracing::error!(room = %state.id, error = %err, "snapshot render failed");
                    None
                }
            };
            conn.last_state = Some(state);
            (msg.into_iter().collect(), false)
        }
        RoomEvent::Phase { phase, timer } => (
            vec![ServerMessage::PhaseChange {
                phase,
                timer,
                night: phase == Phase::Night,
            }],
            false,
        ),
        RoomEvent::NightResult { death, narrative } => (
            vec![ServerMessage::NightPublicResult { death, narrative }],
            false,
        ),
        RoomEvent::InvestigationReady {
            investigator_id,
            result,
        } => {
            if investigator_id == viewer {
                (vec![ServerMessage::DetectiveResult { result }], false)
            } else {
                (vec![], false)
            }
        }
        RoomEvent::Lynch {
            target_id,
            narrative,
        } => (
            vec![ServerMessage::LynchResult {
                target_id,
                narrative,
            }],
            false,
        ),
        RoomEvent::VoteCast {
            player_id,
            target_id,
            tallies,
        } => {
            // The originator already received the direct update.
            if player_id == viewer {
                (vec![], false)
            } else {
                // Live tallies are withheld from roles whose registry entry
                // does not grant them.
                let sees_live = conn
                    .last_state
                    .as_ref()
                    .and_then(|state| state.players.get(&viewer))
                    .and_then(|p| p.role_id)
                    .map(|role| {
                        roles::spec(role).visibility.sees_vote_tallies
                            == roles::TallyVisibility::Live
                    })
                    .unwrap_or(true);
                (
                    vec![ServerMessage::VoteUpdate {
                        player_id,
                        target_id,
                        tallies: if sees_live { tallies } else { None },
                    }],
                    false,
                )
            }
        }
        RoomEvent::PlayerStatus {
            player_id,
            connected,
            alive,
        } => (
            vec![ServerMessage::PlayerStatus {
                player_id,
                connected,
                alive,
            }],
            false,
        ),
        RoomEvent::Chat {
            message_id,
            channel,
            player_id,
            player_name,
            content,
        } => {
            let entitled = conn
                .last_state
                .as_ref()
                .and_then(|state| {
                    state
                        .players
                        .get(&viewer)
                        .map(|p| roles::can_read(p.role_id, p.status, state.phase, channel))
                })
                .unwrap_or(false);
            if entitled {
                (
                    vec![ServerMessage::ChatMessage {
                        message_id,
                        channel,
                        player_id,
                        player_name,
                        content,
                    }],
                    false,
                )
            } else {
                (vec![], false)
            }
        }
        RoomEvent::Nudge { target_id, message } => {
            if target_id == viewer {
                (vec![ServerMessage::HostNudge { message }], false)
            } else {
                (vec![], false)
            }
        }
        RoomEvent::Evicted { socket_id, .. } => {
            if socket_id == conn.socket_id {
                (
                    vec![ServerMessage::SessionEvicted {
                        reason: "duplicate_session".into(),
                        message: "This session was resumed elsewhere.".into(),
                    }],
                    true,
                )
            } else {
                (vec![], false)
            }
        }
    }
}

/// Pull a fresh snapshot directly from the store after subscriber lag.
async fn resync_snapshot(app: &Arc<AppState>, conn: &mut ConnCtx) -> Option<ServerMessage> {
    let room_id = conn.room_id.clone()?;
    let viewer = conn.player_id.clone()?;
    let (state, _) = app.rooms.get_room_state(&room_id).await.ok()??;
    let view = render_view(&state, &viewer).ok()?;
    conn.last_state = Some(state);
    Some(ServerMessage::RoomSnapshot {
        view: Box::new(view),
        jwt: None,
        session_id: None,
    })
}

/// Transport loss: flag the player as disconnected, leaving status and role
/// untouched so the game can continue around them.
async fn mark_disconnected(app: &Arc<AppState>, conn: &ConnCtx) {
    let (Some(player_id), Some(room_id)) = (&conn.player_id, &conn.room_id) else {
        return;
    };
    if app.ensure_leader(room_id).await.is_err() {
        return;
    }
    let result = app
        .rooms
        .update_room_state_safe(room_id, |state| {
            let Some(player) = state.players.get_mut(player_id) else {
                return Ok(None);
            };
            // A newer session may already own this player.
            if player.session_id.as_deref() != conn.session_id.as_deref() {
                return Ok(None);
            }
            player.connected = false;
            Ok(Some(player.is_alive()))
        })
        .await;

    match result {
        Ok((Some(alive), _)) => {
            app.publish_event(
                room_id,
                &RoomEvent::PlayerStatus {
                    player_id: player_id.clone(),
                    connected: false,
                    alive,
                },
            )
            .await;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(room = %room_id, error = %err, "disconnect update failed");
        }
    }
}
