use nocturne::app::AppState;
use nocturne::config::ServerConfig;
use nocturne::protocol::{ClientMessage, HostActionKind, ServerMessage};
use nocturne::store::{Kv, MemoryKv};
use nocturne::types::{
    new_id, Alignment, NightActionType, Phase, PlayerId, PlayerStatus, RoleId, RoomId,
    VictoryCondition, VotingMode,
};
use nocturne::view::render_view;
use nocturne::ws::dispatch::{handle_message, ConnCtx};
use std::collections::HashMap;
use std::sync::Arc;

fn test_config(instance_id: &str) -> ServerConfig {
    ServerConfig {
        port: 0,
        token_secret: [42u8; 32],
        instance_id: instance_id.to_string(),
        lease_ttl_ms: 10_000,
        lease_renew_ms: 3_000,
    }
}

fn test_app() -> Arc<AppState> {
    Arc::new(AppState::new(test_config("test-instance")))
}

fn conn() -> ConnCtx {
    ConnCtx::new(new_id())
}

/// Create a room and return (room_id, host_id, room_code).
async fn create_room(app: &Arc<AppState>, host: &mut ConnCtx, name: &str) -> (RoomId, PlayerId, String) {
    let responses = handle_message(
        app,
        host,
        ClientMessage::RoomCreate {
            host_name: name.to_string(),
        },
    )
    .await;
    assert_eq!(responses.len(), 1);
    match &responses[0] {
        ServerMessage::RoomSnapshot { view, jwt, session_id } => {
            assert!(jwt.is_some());
            assert!(session_id.is_some());
            assert!(view.is_host);
            (view.room_id.clone(), view.host_id.clone(), view.code.clone())
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

async fn join_room(app: &Arc<AppState>, conn: &mut ConnCtx, code: &str, name: &str) -> PlayerId {
    let responses = handle_message(
        app,
        conn,
        ClientMessage::RoomJoin {
            room_code: code.to_string(),
            player_name: name.to_string(),
            session_id: None,
        },
    )
    .await;
    assert_eq!(responses.len(), 1);
    assert!(
        matches!(&responses[0], ServerMessage::RoomSnapshot { .. }),
        "expected snapshot, got {:?}",
        responses[0]
    );
    conn.player_id.clone().expect("join should bind the connection")
}

/// Start the game through the host connection and pin a deterministic role
/// layout for the scenario, cancelling the room coordinator so resolutions
/// are driven explicitly.
async fn start_with_roles(
    app: &Arc<AppState>,
    host: &mut ConnCtx,
    room_id: &str,
    roles: &HashMap<PlayerId, RoleId>,
) {
    let responses = handle_message(
        app,
        host,
        ClientMessage::HostAction {
            action: HostActionKind::Start,
            target_id: None,
        },
    )
    .await;
    assert!(
        matches!(&responses[0], ServerMessage::RoomSnapshot { .. }),
        "start failed: {:?}",
        responses[0]
    );
    app.scheduler.cancel(room_id).await;

    app.rooms
        .update_room_state_safe(room_id, |state| {
            for (player_id, role) in roles {
                let player = state.players.get_mut(player_id).unwrap();
                player.role_id = Some(*role);
                player.alignment = Some(match role {
                    RoleId::Mafia => Alignment::Mafia,
                    _ => Alignment::Town,
                });
            }
            Ok(())
        })
        .await
        .unwrap();
}

async fn submit_action(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    action_id: &str,
    action_type: NightActionType,
    target: &str,
) -> Vec<ServerMessage> {
    handle_message(
        app,
        conn,
        ClientMessage::ActionSubmit {
            action_id: action_id.to_string(),
            action_type,
            target_id: Some(target.to_string()),
        },
    )
    .await
}

async fn cast_vote(
    app: &Arc<AppState>,
    conn: &mut ConnCtx,
    target: Option<&str>,
) -> Vec<ServerMessage> {
    handle_message(
        app,
        conn,
        ClientMessage::VoteCast {
            action_id: new_id(),
            target_id: target.map(|t| t.to_string()),
        },
    )
    .await
}

async fn phase_of(app: &Arc<AppState>, room_id: &str) -> Phase {
    app.rooms
        .get_room_state(room_id)
        .await
        .unwrap()
        .unwrap()
        .0
        .phase
}

/// Advance through day_announcement and day_discussion into day_voting.
async fn advance_to_voting(app: &Arc<AppState>, room_id: &str) {
    assert_eq!(phase_of(app, room_id).await, Phase::DayAnnouncement);
    app.scheduler.resolve(room_id).await.unwrap();
    assert_eq!(phase_of(app, room_id).await, Phase::DayDiscussion);
    app.scheduler.resolve(room_id).await.unwrap();
    assert_eq!(phase_of(app, room_id).await, Phase::DayVoting);
}

/// Standard five-player scenario setup: mafia, doctor, detective, two town.
/// Returns (room_id, conns keyed by role tag).
async fn five_player_game(
    app: &Arc<AppState>,
) -> (RoomId, HashMap<&'static str, (ConnCtx, PlayerId)>) {
    let mut host = conn();
    let (room_id, host_id, code) = create_room(app, &mut host, "Marlow").await;

    let mut joined = Vec::new();
    for name in ["Dahlia", "Derren", "Tessa", "Tobin"] {
        let mut c = conn();
        let pid = join_room(app, &mut c, &code, name).await;
        joined.push((c, pid));
    }

    let mut roles = HashMap::new();
    roles.insert(host_id.clone(), RoleId::Mafia);
    roles.insert(joined[0].1.clone(), RoleId::Doctor);
    roles.insert(joined[1].1.clone(), RoleId::Detective);
    roles.insert(joined[2].1.clone(), RoleId::Townsperson);
    roles.insert(joined[3].1.clone(), RoleId::Townsperson);
    start_with_roles(app, &mut host, &room_id, &roles).await;

    let mut conns = HashMap::new();
    let mut it = joined.into_iter();
    conns.insert("mafia", (host, host_id));
    conns.insert("doctor", it.next().unwrap());
    conns.insert("detective", it.next().unwrap());
    conns.insert("town1", it.next().unwrap());
    conns.insert("town2", it.next().unwrap());
    (room_id, conns)
}

#[tokio::test]
async fn test_create_and_join_flow() {
    let app = test_app();
    let mut host = conn();
    let (room_id, host_id, code) = create_room(&app, &mut host, "Marlow").await;

    let mut guest = conn();
    let guest_id = join_room(&app, &mut guest, &code, "Tessa").await;

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.phase, Phase::Lobby);
    assert_eq!(state.players.len(), 2);
    assert_eq!(state.host_id, host_id);
    assert!(state.players.contains_key(&guest_id));
}

#[tokio::test]
async fn test_join_unknown_code() {
    let app = test_app();
    let mut guest = conn();
    let responses = handle_message(
        &app,
        &mut guest,
        ClientMessage::RoomJoin {
            room_code: "ZZZZZZ".into(),
            player_name: "Tessa".into(),
            session_id: None,
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "ROOM_NOT_FOUND"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let app = test_app();
    let mut host = conn();
    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::RoomCreate {
            host_name: "ab".into(),
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "INVALID_NAME"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_room_full() {
    let app = test_app();
    let mut host = conn();
    let (room_id, _, code) = create_room(&app, &mut host, "Marlow").await;

    app.rooms
        .update_room_state_safe(&room_id, |state| {
            state.settings.max_players = 2;
            Ok(())
        })
        .await
        .unwrap();

    let mut second = conn();
    join_room(&app, &mut second, &code, "Tessa").await;

    let mut third = conn();
    let responses = handle_message(
        &app,
        &mut third,
        ClientMessage::RoomJoin {
            room_code: code,
            player_name: "Tobin".into(),
            session_id: None,
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "ROOM_FULL"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_requires_min_players() {
    let app = test_app();
    let mut host = conn();
    create_room(&app, &mut host, "Marlow").await;

    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::HostAction {
            action: HostActionKind::Start,
            target_id: None,
        },
    )
    .await;
    assert!(matches!(&responses[0], ServerMessage::Error { .. }));
}

#[tokio::test]
async fn test_start_assigns_roles_and_timer() {
    let app = test_app();
    let mut host = conn();
    let (room_id, _, code) = create_room(&app, &mut host, "Marlow").await;
    for name in ["Dahlia", "Derren", "Tessa", "Tobin"] {
        let mut c = conn();
        join_room(&app, &mut c, &code, name).await;
    }

    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::HostAction {
            action: HostActionKind::Start,
            target_id: None,
        },
    )
    .await;
    assert!(matches!(&responses[0], ServerMessage::RoomSnapshot { .. }));
    app.scheduler.cancel(&room_id).await;

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.phase, Phase::Night);
    let timer = state.timer.as_ref().unwrap();
    assert_eq!(timer.phase, Phase::Night);
    assert_eq!(timer.ends_at - timer.started_at, state.settings.night_duration_ms);

    // 5 players: 1 mafia, 1 detective, 1 doctor, 2 townsperson.
    let count = |role| {
        state
            .players
            .values()
            .filter(|p| p.role_id == Some(role))
            .count()
    };
    assert_eq!(count(RoleId::Mafia), 1);
    assert_eq!(count(RoleId::Detective), 1);
    assert_eq!(count(RoleId::Doctor), 1);
    assert_eq!(count(RoleId::Townsperson), 2);
    assert!(state.players.values().all(|p| p.alignment.is_some()));
}

// Scenario 1: kill without protect.
#[tokio::test]
async fn test_kill_without_protect() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let town1_id = conns["town1"].1.clone();

    let (mafia_conn, _) = conns.get_mut("mafia").unwrap();
    submit_action(&app, mafia_conn, &new_id(), NightActionType::Kill, &town1_id).await;
    let (det_conn, _) = conns.get_mut("detective").unwrap();
    let det_target = town1_id.clone();
    submit_action(&app, det_conn, &new_id(), NightActionType::Investigate, &det_target).await;

    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.players[&town1_id].status, PlayerStatus::Dead);
    assert!(state
        .public_narrative
        .iter()
        .any(|l| l == "Tessa was eliminated during the night."));
    assert_eq!(state.victory_condition, VictoryCondition::None);
    assert_eq!(state.phase, Phase::DayAnnouncement);
}

// Scenario 2: protect cancels kill.
#[tokio::test]
async fn test_protect_cancels_kill() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let town1_id = conns["town1"].1.clone();

    let (mafia_conn, _) = conns.get_mut("mafia").unwrap();
    submit_action(&app, mafia_conn, &new_id(), NightActionType::Kill, &town1_id).await;
    let (doc_conn, _) = conns.get_mut("doctor").unwrap();
    submit_action(&app, doc_conn, &new_id(), NightActionType::Protect, &town1_id).await;

    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert!(state.players.values().all(|p| p.is_alive()));
    assert!(state
        .public_narrative
        .iter()
        .any(|l| l == "No one died during the night."));
}

// Scenario 3: detective investigation is visible to the detective only.
#[tokio::test]
async fn test_detective_investigation() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();
    let det_id = conns["detective"].1.clone();

    let (det_conn, _) = conns.get_mut("detective").unwrap();
    submit_action(&app, det_conn, &new_id(), NightActionType::Investigate, &mafia_id).await;

    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    let det_view = render_view(&state, &det_id).unwrap();
    let results = det_view.investigation_results.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].target_id, mafia_id);
    assert!(results[0].is_mafia);

    for tag in ["mafia", "doctor", "town1", "town2"] {
        let viewer = &conns[tag].1;
        let view = render_view(&state, viewer).unwrap();
        assert!(
            view.investigation_results.is_none(),
            "{tag} should not see investigations"
        );
    }
}

// Scenario 4: majority lynch of the mafia ends the game in town victory.
#[tokio::test]
async fn test_majority_lynch_and_town_victory() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();
    let town1_id = conns["town1"].1.clone();

    app.scheduler.resolve(&room_id).await.unwrap(); // quiet night
    advance_to_voting(&app, &room_id).await;

    for tag in ["doctor", "detective", "town1"] {
        let target = mafia_id.clone();
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, Some(&target)).await;
    }
    {
        let target = town1_id.clone();
        let (c, _) = conns.get_mut("mafia").unwrap();
        cast_vote(&app, c, Some(&target)).await;
    }
    {
        let (c, _) = conns.get_mut("town2").unwrap();
        cast_vote(&app, c, None).await;
    }

    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.players[&mafia_id].status, PlayerStatus::Dead);
    assert!(state
        .public_narrative
        .iter()
        .any(|l| l == "Marlow was lynched with 3 votes. They were a mafia."));
    assert_eq!(state.victory_condition, VictoryCondition::TownVictory);
    assert_eq!(state.phase, Phase::Ended);
    assert!(state.timer.is_none());
}

// Scenario 5: a tie under majority voting lynches no one.
#[tokio::test]
async fn test_tie_no_lynch() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();
    let town1_id = conns["town1"].1.clone();

    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    for tag in ["doctor", "detective"] {
        let target = mafia_id.clone();
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, Some(&target)).await;
    }
    for tag in ["mafia", "town2"] {
        let target = town1_id.clone();
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, Some(&target)).await;
    }
    {
        let (c, _) = conns.get_mut("town1").unwrap();
        cast_vote(&app, c, None).await;
    }

    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert!(state.players.values().all(|p| p.is_alive()));
    assert!(state
        .public_narrative
        .iter()
        .any(|l| l == "No one was lynched. The town could not reach a decision."));
    assert_eq!(state.phase, Phase::Night);
}

// Scenario 6: duplicate action id returns the original ack without a
// second side effect.
#[tokio::test]
async fn test_duplicate_action_id_idempotent() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let town1_id = conns["town1"].1.clone();
    let mafia_id = conns["mafia"].1.clone();
    let action_id = new_id();

    let (mafia_conn, _) = conns.get_mut("mafia").unwrap();
    let first =
        submit_action(&app, mafia_conn, &action_id, NightActionType::Kill, &town1_id).await;
    assert!(matches!(&first[0], ServerMessage::ActionAck { .. }));

    let second =
        submit_action(&app, mafia_conn, &action_id, NightActionType::Kill, &town1_id).await;
    assert_eq!(first, second, "replay must return the original ack");

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    let mafia_actions = state
        .night_actions
        .values()
        .filter(|a| a.player_id == mafia_id)
        .count();
    assert_eq!(mafia_actions, 1);
}

#[tokio::test]
async fn test_second_action_id_rejected_as_already_submitted() {
    let app = test_app();
    let (_room_id, mut conns) = five_player_game(&app).await;
    let town1_id = conns["town1"].1.clone();
    let town2_id = conns["town2"].1.clone();

    let (mafia_conn, _) = conns.get_mut("mafia").unwrap();
    submit_action(&app, mafia_conn, &new_id(), NightActionType::Kill, &town1_id).await;
    let responses =
        submit_action(&app, mafia_conn, &new_id(), NightActionType::Kill, &town2_id).await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "ALREADY_SUBMITTED"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_vote_overwrite_latest_wins() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();
    let town2_id = conns["town2"].1.clone();
    let town1_id = conns["town1"].1.clone();

    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    {
        let first_target = town2_id.clone();
        let second_target = mafia_id.clone();
        let (c, _) = conns.get_mut("town1").unwrap();
        cast_vote(&app, c, Some(&first_target)).await;
        cast_vote(&app, c, Some(&second_target)).await;
    }

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    let votes: Vec<_> = state
        .votes
        .values()
        .filter(|v| v.player_id == town1_id)
        .collect();
    assert_eq!(votes.len(), 1, "one effective vote per player");
    assert_eq!(votes[0].target_id, Some(mafia_id));

    // The vote pipeline records acks the same way action.submit does.
    let session = app.sessions.get(&town1_id, &room_id).await.unwrap().unwrap();
    assert_eq!(
        session.last_acked_action_id.as_ref(),
        Some(&votes[0].action_id)
    );
}

#[tokio::test]
async fn test_vote_in_wrong_phase_rejected() {
    let app = test_app();
    let (_room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();

    let target = mafia_id.clone();
    let (c, _) = conns.get_mut("town1").unwrap();
    let responses = cast_vote(&app, c, Some(&target)).await;
    match &responses[0] {
        ServerMessage::Error { code, retryable, .. } => {
            assert_eq!(code, "WRONG_PHASE");
            assert!(!retryable);
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_session_resume_evicts_previous_socket() {
    let app = test_app();
    let mut host = conn();

    // Register the host's socket so the eviction notice can be observed.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    app.register_socket(&host.socket_id.clone(), tx).await;

    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::RoomCreate {
            host_name: "Marlow".into(),
        },
    )
    .await;
    let (room_id, jwt, session_id) = match &responses[0] {
        ServerMessage::RoomSnapshot { view, jwt, session_id } => (
            view.room_id.clone(),
            jwt.clone().unwrap(),
            session_id.clone().unwrap(),
        ),
        other => panic!("expected snapshot, got {other:?}"),
    };

    // A second device resumes the same session.
    let mut second = conn();
    let responses = handle_message(
        &app,
        &mut second,
        ClientMessage::SessionResume {
            room_id: room_id.clone(),
            session_id: session_id.clone(),
            jwt,
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::RoomSnapshot { session_id: sid, .. } => {
            assert_eq!(sid.as_ref(), Some(&session_id));
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    // The original socket got the eviction notice.
    let evicted = rx.recv().await.unwrap();
    match evicted {
        ServerMessage::SessionEvicted { reason, .. } => assert_eq!(reason, "duplicate_session"),
        other => panic!("expected eviction, got {other:?}"),
    }

    let session = app
        .sessions
        .get(second.player_id.as_ref().unwrap(), &room_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.socket_id, second.socket_id);
}

#[tokio::test]
async fn test_resume_replays_last_acked_action() {
    let app = test_app();
    let mut host = conn();
    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::RoomCreate {
            host_name: "Marlow".into(),
        },
    )
    .await;
    let (room_id, host_id, code, jwt, session_id) = match &responses[0] {
        ServerMessage::RoomSnapshot { view, jwt, session_id } => (
            view.room_id.clone(),
            view.host_id.clone(),
            view.code.clone(),
            jwt.clone().unwrap(),
            session_id.clone().unwrap(),
        ),
        other => panic!("expected snapshot, got {other:?}"),
    };

    let mut joined = Vec::new();
    for name in ["Dahlia", "Derren", "Tessa", "Tobin"] {
        let mut c = conn();
        let pid = join_room(&app, &mut c, &code, name).await;
        joined.push((c, pid));
    }
    let mut roles = HashMap::new();
    roles.insert(host_id, RoleId::Mafia);
    roles.insert(joined[0].1.clone(), RoleId::Doctor);
    roles.insert(joined[1].1.clone(), RoleId::Detective);
    roles.insert(joined[2].1.clone(), RoleId::Townsperson);
    roles.insert(joined[3].1.clone(), RoleId::Townsperson);
    start_with_roles(&app, &mut host, &room_id, &roles).await;

    let action_id = new_id();
    let target = joined[2].1.clone();
    let first = submit_action(&app, &mut host, &action_id, NightActionType::Kill, &target).await;
    assert!(matches!(&first[0], ServerMessage::ActionAck { .. }));

    // Reconnect on a fresh socket: snapshot first, then the last ack so the
    // client does not resubmit under a new action id.
    let mut second = conn();
    let responses = handle_message(
        &app,
        &mut second,
        ClientMessage::SessionResume {
            room_id,
            session_id,
            jwt,
        },
    )
    .await;
    assert_eq!(responses.len(), 2);
    assert!(matches!(&responses[0], ServerMessage::RoomSnapshot { .. }));
    match &responses[1] {
        ServerMessage::ActionAck { action_id: acked, .. } => assert_eq!(acked, &action_id),
        other => panic!("expected replayed ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_with_forged_token_rejected() {
    let app = test_app();
    let mut host = conn();
    let (room_id, ..) = create_room(&app, &mut host, "Marlow").await;

    let mut attacker = conn();
    let responses = handle_message(
        &app,
        &mut attacker,
        ClientMessage::SessionResume {
            room_id,
            session_id: new_id(),
            jwt: "forged.token".into(),
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_host_only_actions() {
    let app = test_app();
    let mut host = conn();
    let (_, _, code) = create_room(&app, &mut host, "Marlow").await;

    let mut guest = conn();
    join_room(&app, &mut guest, &code, "Tessa").await;

    let responses = handle_message(
        &app,
        &mut guest,
        ClientMessage::HostAction {
            action: HostActionKind::Start,
            target_id: None,
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_host_kick_in_lobby_removes_player() {
    let app = test_app();
    let mut host = conn();
    let (room_id, _, code) = create_room(&app, &mut host, "Marlow").await;

    let mut guest = conn();
    let guest_id = join_room(&app, &mut guest, &code, "Tessa").await;

    let responses = handle_message(
        &app,
        &mut host,
        ClientMessage::HostAction {
            action: HostActionKind::Kick,
            target_id: Some(guest_id.clone()),
        },
    )
    .await;
    assert!(matches!(&responses[0], ServerMessage::RoomSnapshot { .. }));

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert!(!state.players.contains_key(&guest_id));
    assert!(app.sessions.get(&guest_id, &room_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_anonymous_voting_hides_tallies() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();

    app.rooms
        .update_room_state_safe(&room_id, |state| {
            state.settings.anonymous_voting = true;
            Ok(())
        })
        .await
        .unwrap();

    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    let target = mafia_id.clone();
    let (c, _) = conns.get_mut("town1").unwrap();
    let responses = cast_vote(&app, c, Some(&target)).await;
    match &responses[0] {
        ServerMessage::VoteUpdate { tallies, .. } => assert!(tallies.is_none()),
        other => panic!("expected vote update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_plurality_mode_lynch() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();

    app.rooms
        .update_room_state_safe(&room_id, |state| {
            state.settings.voting_mode = VotingMode::Plurality;
            Ok(())
        })
        .await
        .unwrap();

    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    // A single vote suffices under plurality.
    let target = mafia_id.clone();
    let (c, _) = conns.get_mut("town1").unwrap();
    cast_vote(&app, c, Some(&target)).await;
    for tag in ["mafia", "doctor", "detective", "town2"] {
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, None).await;
    }

    app.scheduler.resolve(&room_id).await.unwrap();
    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.players[&mafia_id].status, PlayerStatus::Dead);
}

#[tokio::test]
async fn test_concurrent_action_submissions_serialize() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let town1_id = conns["town1"].1.clone();
    let town2_id = conns["town2"].1.clone();

    // Mafia and detective submit from separate tasks against the same room.
    let (mafia_conn, _) = conns.remove("mafia").unwrap();
    let (det_conn, _) = conns.remove("detective").unwrap();
    let app_a = app.clone();
    let app_b = app.clone();
    let kill_target = town1_id.clone();
    let investigate_target = town2_id.clone();

    let a = tokio::spawn(async move {
        let mut c = mafia_conn;
        submit_action(&app_a, &mut c, &new_id(), NightActionType::Kill, &kill_target).await
    });
    let b = tokio::spawn(async move {
        let mut c = det_conn;
        submit_action(
            &app_b,
            &mut c,
            &new_id(),
            NightActionType::Investigate,
            &investigate_target,
        )
        .await
    });

    let ra = a.await.unwrap();
    let rb = b.await.unwrap();
    assert!(matches!(&ra[0], ServerMessage::ActionAck { .. }));
    assert!(matches!(&rb[0], ServerMessage::ActionAck { .. }));

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.night_actions.len(), 2);
}

#[tokio::test]
async fn test_leader_failover_preserves_timer_and_host() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let app_a = Arc::new(AppState::with_kv(test_config("instance-a"), kv.clone()));
    let app_b = Arc::new(AppState::with_kv(test_config("instance-b"), kv));

    let (room_id, mut conns) = five_player_game(&app_a).await;
    let (state_before, _) = app_a.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    let timer_before = state_before.timer.clone().unwrap();
    let host_before = state_before.host_id.clone();

    // Instance B cannot commit while A holds the lease.
    assert_eq!(
        app_b.ensure_leader(&room_id).await.unwrap_err().code(),
        "INTERNAL_ERROR"
    );

    // A shuts down gracefully; B takes over mid-phase.
    app_a.scheduler.shutdown().await;
    app_a.leader.release_all().await;
    app_b.ensure_leader(&room_id).await.unwrap();

    let town1 = conns["town1"].1.clone();
    let (mafia_conn, _) = conns.get_mut("mafia").unwrap();
    // Rebind the mafia connection through B by resubmitting there.
    let responses =
        submit_action(&app_b, mafia_conn, &new_id(), NightActionType::Kill, &town1).await;
    assert!(matches!(&responses[0], ServerMessage::ActionAck { .. }));

    let (state_after, _) = app_b.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state_after.host_id, host_before);
    assert_eq!(state_after.timer.unwrap(), timer_before);
}

#[tokio::test]
async fn test_unjoined_connection_cannot_act() {
    let app = test_app();
    let mut stranger = conn();
    let responses = handle_message(
        &app,
        &mut stranger,
        ClientMessage::ActionSubmit {
            action_id: new_id(),
            action_type: NightActionType::Kill,
            target_id: Some(new_id()),
        },
    )
    .await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_game_to_mafia_victory() {
    let app = test_app();
    let (room_id, mut conns) = five_player_game(&app).await;
    let mafia_id = conns["mafia"].1.clone();

    // Night 1: kill town1.
    let victim = conns["town1"].1.clone();
    {
        let (c, _) = conns.get_mut("mafia").unwrap();
        submit_action(&app, c, &new_id(), NightActionType::Kill, &victim).await;
    }
    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    // Day 1: everyone abstains.
    for tag in ["mafia", "doctor", "detective", "town2"] {
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, None).await;
    }
    app.scheduler.resolve(&room_id).await.unwrap();
    assert_eq!(phase_of(&app, &room_id).await, Phase::Night);

    // Night 2: kill town2.
    let victim = conns["town2"].1.clone();
    {
        let (c, _) = conns.get_mut("mafia").unwrap();
        submit_action(&app, c, &new_id(), NightActionType::Kill, &victim).await;
    }
    app.scheduler.resolve(&room_id).await.unwrap();
    advance_to_voting(&app, &room_id).await;

    for tag in ["mafia", "doctor", "detective"] {
        let (c, _) = conns.get_mut(tag).unwrap();
        cast_vote(&app, c, None).await;
    }
    app.scheduler.resolve(&room_id).await.unwrap();
    assert_eq!(phase_of(&app, &room_id).await, Phase::Night);

    // Night 3: kill the doctor; one mafia vs one detective ends it.
    let victim = conns["doctor"].1.clone();
    {
        let (c, _) = conns.get_mut("mafia").unwrap();
        submit_action(&app, c, &new_id(), NightActionType::Kill, &victim).await;
    }
    app.scheduler.resolve(&room_id).await.unwrap();

    let (state, _) = app.rooms.get_room_state(&room_id).await.unwrap().unwrap();
    assert_eq!(state.phase, Phase::Ended);
    assert_eq!(state.victory_condition, VictoryCondition::MafiaVictory);
    assert!(state.players[&mafia_id].is_alive());

    // Post-game actions are rejected.
    let (c, _) = conns.get_mut("detective").unwrap();
    let responses = cast_vote(&app, c, None).await;
    match &responses[0] {
        ServerMessage::Error { code, .. } => assert_eq!(code, "WRONG_PHASE"),
        other => panic!("expected error, got {other:?}"),
    }
}
