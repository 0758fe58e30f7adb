//! Command dispatcher: decode, authenticate, dedup, policy-check, mutate,
//! commit, publish, ack. One entry point per inbound frame.

use crate::app::AppState;
use crate::engine;
use crate::error::GameError;
use crate::policy;
use crate::protocol::{
    ClientMessage, HostActionKind, RoomEvent, ServerMessage, MAX_CHAT_CHARS,
};
use crate::roles;
use crate::store::DedupOutcome;
use crate::types::{
    new_id, now_ms, valid_name, NightAction, NightActionType, Phase, Player, PlayerId,
    RoomId, SessionId, Vote,
};
use crate::view::render_view;
use std::sync::Arc;

/// Per-connection context, bound on create/join/resume.
#[derive(Debug, Default)]
pub struct ConnCtx {
    pub socket_id: String,
    pub player_id: Option<PlayerId>,
    pub room_id: Option<RoomId>,
    pub session_id: Option<SessionId>,
    /// Last committed state seen on this connection, for chat entitlement.
    pub last_state: Option<crate::types::RoomState>,
}

impl ConnCtx {
    pub fn new(socket_id: String) -> Self {
        Self {
            socket_id,
            ..Default::default()
        }
    }

    fn bind(&mut self, player_id: PlayerId, room_id: RoomId, session_id: SessionId) {
        self.player_id = Some(player_id);
        self.room_id = Some(room_id);
        self.session_id = Some(session_id);
    }

    fn authed(&self) -> Result<(PlayerId, RoomId), GameError> {
        match (&self.player_id, &self.room_id) {
            (Some(player), Some(room)) => Ok((player.clone(), room.clone())),
            _ => Err(GameError::Unauthorized("not joined to a room".into())),
        }
    }
}

/// Handle one decoded client frame, returning the direct responses for this
/// socket. Broadcast effects travel the store's pub/sub channel.
pub async fn handle_message(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    msg: ClientMessage,
) -> Vec<ServerMessage> {
    let result = match msg {
        ClientMessage::RoomCreate { host_name } => handle_room_create(app, conn, host_name).await,
        ClientMessage::RoomJoin {
            room_code,
            player_name,
            ..
        } => handle_room_join(app, conn, room_code, player_name).await,
        ClientMessage::SessionResume {
            room_id,
            session_id,
            jwt,
        } => handle_session_resume(app, conn, room_id, session_id, jwt).await,
        ClientMessage::ActionSubmit {
            action_id,
            action_type,
            target_id,
        } => handle_action_submit(app, conn, action_id, action_type, target_id).await,
        ClientMessage::VoteCast {
            action_id,
            target_id,
        } => handle_vote_cast(app, conn, action_id, target_id).await,
        ClientMessage::HostAction { action, target_id } => {
            handle_host_action(app, conn, action, target_id).await
        }
        ClientMessage::ChatMessage {
            message_id,
            channel,
            content,
        } => handle_chat(app, conn, message_id, channel, content).await,
    };

    match result {
        Ok(messages) => messages,
        Err(err) => {
            if let GameError::Internal(detail) = &err {
                tracing::error!(socket = %conn.socket_id, %detail, "command failed internally");
            }
            vec![ServerMessage::error(&err)]
        }
    }
}

async fn handle_room_create(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    host_name: String,
) -> Result<Vec<ServerMessage>, GameError> {
    if !valid_name(&host_name) {
        return Err(GameError::InvalidName);
    }

    let state = app.rooms.create_room(&host_name).await?;
    let host_id = state.host_id.clone();
    let room_id = state.id.clone();

    app.ensure_leader(&room_id).await?;
    let (session, _) = app
        .sessions
        .register(&host_id, &room_id, &conn.socket_id)
        .await?;

    let (_, state) = app
        .rooms
        .update_room_state_safe(&room_id, |s| {
            if let Some(host) = s.players.get_mut(&host_id) {
                host.session_id = Some(session.session_id.clone());
            }
            Ok(())
        })
        .await?;

    let jwt = app.tokens.issue(&host_id, &room_id, &session.session_id);
    app.scheduler.ensure_room(&room_id).await;
    conn.bind(host_id.clone(), room_id, session.session_id.clone());
    conn.last_state = Some(state.clone());

    let view = render_view(&state, &host_id)?;
    Ok(vec![ServerMessage::RoomSnapshot {
        view: Box::new(view),
        jwt: Some(jwt),
        session_id: Some(session.session_id),
    }])
}

async fn handle_room_join(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    room_code: String,
    player_name: String,
) -> Result<Vec<ServerMessage>, GameError> {
    if !valid_name(&player_name) {
        return Err(GameError::InvalidName);
    }
    let code = room_code.to_uppercase();
    let room_id = app
        .rooms
        .find_room_by_code(&code)
        .await?
        .ok_or(GameError::RoomNotFound)?;

    app.ensure_leader(&room_id).await?;

    // Early reject before creating a session; the mutator re-checks under
    // the commit.
    let (current, _) = app
        .rooms
        .get_room_state(&room_id)
        .await?
        .ok_or(GameError::RoomNotFound)?;
    policy::check_join(&current)?;

    let player_id = new_id();
    let (session, _) = app
        .sessions
        .register(&player_id, &room_id, &conn.socket_id)
        .await?;

    let (_, state) = app
        .rooms
        .update_room_state_safe(&room_id, |s| {
            policy::check_join(s)?;
            let mut player = Player::new(player_id.clone(), player_name.clone());
            player.session_id = Some(session.session_id.clone());
            s.players.insert(player_id.clone(), player);
            Ok(())
        })
        .await?;

    app.publish_event(
        &room_id,
        &RoomEvent::PlayerStatus {
            player_id: player_id.clone(),
            connected: true,
            alive: true,
        },
    )
    .await;

    let jwt = app.tokens.issue(&player_id, &room_id, &session.session_id);
    app.scheduler.ensure_room(&room_id).await;
    conn.bind(player_id.clone(), room_id, session.session_id.clone());
    conn.last_state = Some(state.clone());

    tracing::info!(room = %state.id, player = %player_id, "player joined");
    let view = render_view(&state, &player_id)?;
    Ok(vec![ServerMessage::RoomSnapshot {
        view: Box::new(view),
        jwt: Some(jwt),
        session_id: Some(session.session_id),
    }])
}

async fn handle_session_resume(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    room_id: String,
    session_id: String,
    jwt: String,
) -> Result<Vec<ServerMessage>, GameError> {
    let claims = app.tokens.verify_for_room(&jwt, &room_id)?;
    if claims.session_id != session_id {
        return Err(GameError::Unauthorized("session mismatch".into()));
    }

    let (session, prior_socket) = app
        .sessions
        .resume(&claims.sub, &room_id, &session_id, &conn.socket_id)
        .await?
        .ok_or_else(|| GameError::Unauthorized("unknown session".into()))?;

    if let Some(old_socket) = prior_socket {
        // Latest wins: the previous transport gets an eviction notice and
        // closes. The event also reaches sockets on other instances.
        let notice = ServerMessage::SessionEvicted {
            reason: "duplicate_session".into(),
            message: "This session was resumed elsewhere.".into(),
        };
        app.send_to_socket(&old_socket, notice).await;
        app.publish_event(
            &room_id,
            &RoomEvent::Evicted {
                player_id: claims.sub.clone(),
                socket_id: old_socket,
                reason: "duplicate_session".into(),
            },
        )
        .await;
    }

    app.ensure_leader(&room_id).await?;
    let (alive, state) = app
        .rooms
        .update_room_state_safe(&room_id, |s| {
            let player = s
                .players
                .get_mut(&claims.sub)
                .ok_or_else(|| GameError::Unauthorized("unknown player".into()))?;
            player.connected = true;
            Ok(player.is_alive())
        })
        .await?;

    app.publish_event(
        &room_id,
        &RoomEvent::PlayerStatus {
            player_id: claims.sub.clone(),
            connected: true,
            alive,
        },
    )
    .await;

    let refreshed = app.tokens.refresh_if_needed(&claims);
    app.scheduler.ensure_room(&room_id).await;
    conn.bind(claims.sub.clone(), room_id.clone(), session.session_id.clone());
    conn.last_state = Some(state.clone());

    let view = render_view(&state, &claims.sub)?;
    let mut responses = vec![ServerMessage::RoomSnapshot {
        view: Box::new(view),
        jwt: refreshed,
        session_id: Some(session.session_id),
    }];

    // Replay the last acknowledged submission so a client that reconnected
    // mid-retry does not resubmit into a new action id.
    if let Some(last_action) = &session.last_acked_action_id {
        if let Some(stored) = app
            .dedup
            .completed_response(last_action, &claims.sub, &room_id)
            .await?
        {
            if let Ok(ack) = serde_json::from_value::<ServerMessage>(stored) {
                responses.push(ack);
            }
        }
    }
    Ok(responses)
}

async fn handle_action_submit(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    action_id: String,
    action_type: NightActionType,
    target_id: Option<String>,
) -> Result<Vec<ServerMessage>, GameError> {
    let (player_id, room_id) = conn.authed()?;

    match app.dedup.begin(&action_id, &player_id, &room_id).await? {
        DedupOutcome::Fresh => {}
        DedupOutcome::InFlight => return Ok(vec![]),
        DedupOutcome::Completed(response) => return Ok(vec![replay(response)]),
        DedupOutcome::RecentlyFailed(code) => return Ok(vec![failed_again(code)]),
    }

    if let Err(err) = app.ensure_leader(&room_id).await {
        app.dedup
            .fail(&action_id, &player_id, &room_id, err.code())
            .await?;
        return Err(err);
    }

    let commit = app
        .rooms
        .update_room_state_safe(&room_id, |state| {
            policy::check_night_action(state, &player_id, action_type, target_id.as_deref())?;
            if state
                .night_actions
                .values()
                .any(|a| a.player_id == player_id && a.action_id != action_id)
            {
                return Err(GameError::AlreadySubmitted);
            }
            if !state.night_actions.contains_key(&action_id) {
                state.night_actions.insert(
                    action_id.clone(),
                    NightAction {
                        id: new_id(),
                        action_id: action_id.clone(),
                        player_id: player_id.clone(),
                        action_type,
                        target_id: target_id.clone(),
                        submitted_at: now_ms(),
                        priority: action_type.priority(),
                    },
                );
            }
            Ok(())
        })
        .await;

    if let Err(err) = commit {
        app.dedup
            .fail(&action_id, &player_id, &room_id, err.code())
            .await?;
        return Err(err);
    }

    let ack = ServerMessage::ActionAck {
        action_id: action_id.clone(),
        action_type,
        target_id,
    };
    if let Ok(stored) = serde_json::to_value(&ack) {
        app.dedup
            .complete(&action_id, &player_id, &room_id, stored)
            .await?;
    }
    app.sessions
        .record_ack(&player_id, &room_id, &action_id)
        .await?;
    app.scheduler.poke(&room_id).await;

    Ok(vec![ack])
}

async fn handle_vote_cast(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    action_id: String,
    target_id: Option<String>,
) -> Result<Vec<ServerMessage>, GameError> {
    let (player_id, room_id) = conn.authed()?;

    match app.dedup.begin(&action_id, &player_id, &room_id).await? {
        DedupOutcome::Fresh => {}
        DedupOutcome::InFlight => return Ok(vec![]),
        DedupOutcome::Completed(response) => return Ok(vec![replay(response)]),
        DedupOutcome::RecentlyFailed(code) => return Ok(vec![failed_again(code)]),
    }

    if let Err(err) = app.ensure_leader(&room_id).await {
        app.dedup
            .fail(&action_id, &player_id, &room_id, err.code())
            .await?;
        return Err(err);
    }

    let commit = app
        .rooms
        .update_room_state_safe(&room_id, |state| {
            policy::check_vote(state, &player_id, target_id.as_deref())?;
            // Latest submission wins: drop the voter's previous record
            // before inserting under the new action id.
            state.votes.retain(|_, v| v.player_id != player_id);
            state.votes.insert(
                action_id.clone(),
                Vote {
                    id: new_id(),
                    action_id: action_id.clone(),
                    player_id: player_id.clone(),
                    target_id: target_id.clone(),
                    submitted_at: now_ms(),
                },
            );
            let tallies =
                (!state.settings.anonymous_voting).then(|| engine::tally(state));
            Ok(tallies)
        })
        .await;

    let (tallies, state) = match commit {
        Ok(committed) => committed,
        Err(err) => {
            app.dedup
                .fail(&action_id, &player_id, &room_id, err.code())
                .await?;
            return Err(err);
        }
    };

    app.publish_event(
        &room_id,
        &RoomEvent::VoteCast {
            player_id: player_id.clone(),
            target_id: target_id.clone(),
            tallies: tallies.clone(),
        },
    )
    .await;

    // The voter's own update honours the role's tally visibility too.
    let sees_live = state
        .players
        .get(&player_id)
        .and_then(|p| p.role_id)
        .map(|role| {
            roles::spec(role).visibility.sees_vote_tallies == roles::TallyVisibility::Live
        })
        .unwrap_or(true);
    let update = ServerMessage::VoteUpdate {
        player_id: player_id.clone(),
        target_id,
        tallies: if sees_live { tallies } else { None },
    };
    if let Ok(stored) = serde_json::to_value(&update) {
        app.dedup
            .complete(&action_id, &player_id, &room_id, stored)
            .await?;
    }
    app.sessions
        .record_ack(&player_id, &room_id, &action_id)
        .await?;
    app.scheduler.poke(&room_id).await;

    Ok(vec![update])
}

async fn handle_host_action(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    action: HostActionKind,
    target_id: Option<String>,
) -> Result<Vec<ServerMessage>, GameError> {
    let (caller_id, room_id) = conn.authed()?;
    app.ensure_leader(&room_id).await?;

    match action {
        HostActionKind::Start => {
            let (change, state) = app
                .rooms
                .update_room_state_safe(&room_id, |state| {
                    policy::check_start_game(state, &caller_id)?;
                    let ids: Vec<PlayerId> = state.players.keys().cloned().collect();
                    for (player_id, role) in roles::distribute(&ids) {
                        if let Some(player) = state.players.get_mut(&player_id) {
                            player.role_id = Some(role);
                            player.alignment = Some(roles::spec(role).alignment);
                        }
                    }
                    Ok(engine::advance_phase(state, now_ms()))
                })
                .await?;

            app.publish_event(
                &room_id,
                &RoomEvent::Phase {
                    phase: change.phase,
                    timer: change.timer,
                },
            )
            .await;
            app.scheduler.ensure_room(&room_id).await;
            app.scheduler.poke(&room_id).await;
            tracing::info!(room = %room_id, players = state.players.len(), "game started");

            let view = render_view(&state, &caller_id)?;
            Ok(vec![snapshot(view)])
        }
        HostActionKind::Kick => {
            let target =
                target_id.ok_or_else(|| GameError::InvalidTarget("target required".into()))?;
            let ((kicked_alive, removed), state) = app
                .rooms
                .update_room_state_safe(&room_id, |state| {
                    policy::check_host_action(state, &caller_id)?;
                    if target == state.host_id {
                        return Err(GameError::InvalidTarget("cannot kick the host".into()));
                    }
                    if state.phase == Phase::Lobby {
                        state
                            .players
                            .remove(&target)
                            .ok_or_else(|| GameError::InvalidTarget("unknown target".into()))?;
                        Ok((false, true))
                    } else {
                        let player = state
                            .players
                            .get_mut(&target)
                            .ok_or_else(|| GameError::InvalidTarget("unknown target".into()))?;
                        let was_alive = player.is_alive();
                        player.status = crate::types::PlayerStatus::Dead;
                        let name = player.name.clone();
                        state
                            .public_narrative
                            .push(format!("{name} was removed from the game."));
                        Ok((was_alive, false))
                    }
                })
                .await?;

            if removed {
                let _ = app.sessions.evict(&target, &room_id).await;
            }
            app.publish_event(
                &room_id,
                &RoomEvent::PlayerStatus {
                    player_id: target,
                    connected: false,
                    alive: false,
                },
            )
            .await;
            // A mid-game kick can satisfy a completion predicate.
            if kicked_alive {
                app.scheduler.poke(&room_id).await;
            }

            let view = render_view(&state, &caller_id)?;
            Ok(vec![snapshot(view)])
        }
        HostActionKind::Mute => {
            let target =
                target_id.ok_or_else(|| GameError::InvalidTarget("target required".into()))?;
            let (_, state) = app
                .rooms
                .update_room_state_safe(&room_id, |state| {
                    policy::check_host_action(state, &caller_id)?;
                    let player = state
                        .players
                        .get_mut(&target)
                        .ok_or_else(|| GameError::InvalidTarget("unknown target".into()))?;
                    player.muted = true;
                    Ok(())
                })
                .await?;
            let view = render_view(&state, &caller_id)?;
            Ok(vec![snapshot(view)])
        }
        HostActionKind::Nudge => {
            let target =
                target_id.ok_or_else(|| GameError::InvalidTarget("target required".into()))?;
            let (state, _) = app
                .rooms
                .get_room_state(&room_id)
                .await?
                .ok_or(GameError::RoomNotFound)?;
            policy::check_host_action(&state, &caller_id)?;
            if !state.players.contains_key(&target) {
                return Err(GameError::InvalidTarget("unknown target".into()));
            }
            app.publish_event(
                &room_id,
                &RoomEvent::Nudge {
                    target_id: target,
                    message: "The host is waiting for you.".into(),
                },
            )
            .await;
            Ok(vec![])
        }
    }
}

async fn handle_chat(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    message_id: String,
    channel: roles::ChatChannel,
    content: String,
) -> Result<Vec<ServerMessage>, GameError> {
    let (player_id, room_id) = conn.authed()?;
    if content.chars().count() > MAX_CHAT_CHARS {
        return Ok(vec![]);
    }

    let (state, _) = app
        .rooms
        .get_room_state(&room_id)
        .await?
        .ok_or(GameError::RoomNotFound)?;
    let Some(player) = state.players.get(&player_id) else {
        return Ok(vec![]);
    };
    if player.muted || !roles::can_speak(player.role_id, player.status, state.phase, channel) {
        // Dropped silently; the sender never learns they were muted.
        return Ok(vec![]);
    }

    app.publish_event(
        &room_id,
        &RoomEvent::Chat {
            message_id,
            channel,
            player_id: player_id.clone(),
            player_name: player.name.clone(),
            content,
        },
    )
    .await;
    Ok(vec![])
}

fn snapshot(view: crate::view::RoomView) -> ServerMessage {
    ServerMessage::RoomSnapshot {
        view: Box::new(view),
        jwt: None,
        session_id: None,
    }
}

/// Re-emit a stored ack for an idempotent duplicate.
fn replay(stored: serde_json::Value) -> ServerMessage {
    serde_json::from_value(stored).unwrap_or_else(|_| {
        ServerMessage::error(&GameError::IdempotentDuplicate)
    })
}

fn failed_again(code: String) -> ServerMessage {
    ServerMessage::Error {
        code,
        message: "a recent attempt with this action id failed; retry shortly".into(),
        retryable: true,
        context: None,
    }
}
