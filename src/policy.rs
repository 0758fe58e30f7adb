//! Policy gate: phase, role, and target legality checks run ahead of the
//! reducers. Nothing here mutates state.

use crate::error::GameError;
use crate::roles::{self, TargetFilter};
use crate::types::{Alignment, NightActionType, Phase, RoomState};

/// A night action submission must obey the actor's role spec and targeting
/// rules in full.
pub fn check_night_action(
    state: &RoomState,
    player_id: &str,
    action_type: NightActionType,
    target_id: Option<&str>,
) -> Result<(), GameError> {
    if state.phase != Phase::Night {
        return Err(GameError::WrongPhase);
    }
    let actor = state
        .players
        .get(player_id)
        .ok_or_else(|| GameError::Unauthorized("unknown player".into()))?;
    if !actor.is_alive() {
        return Err(GameError::DeadPlayer);
    }
    let role = actor
        .role_id
        .ok_or_else(|| GameError::Unauthorized("role not assigned".into()))?;
    let spec = roles::spec(role);

    if action_type == NightActionType::None {
        // Explicit no-op submission; legal for any role with a night action.
        if spec.night.is_none() {
            return Err(GameError::InvalidTarget("role has no night action".into()));
        }
        return Ok(());
    }

    let night = spec
        .night
        .ok_or_else(|| GameError::InvalidTarget("role has no night action".into()))?;
    if night.action_type != action_type {
        return Err(GameError::InvalidTarget(format!(
            "role cannot perform {action_type:?}"
        )));
    }

    let target_id = match target_id {
        Some(t) => t,
        None if night.target_required => {
            return Err(GameError::InvalidTarget("target required".into()))
        }
        None => return Ok(()),
    };

    let target = state
        .players
        .get(target_id)
        .ok_or_else(|| GameError::InvalidTarget("unknown target".into()))?;

    if !spec.targets.allow_self && target_id == player_id {
        return Err(GameError::InvalidTarget("cannot target yourself".into()));
    }
    if target.is_alive() && !spec.targets.allow_alive {
        return Err(GameError::InvalidTarget("cannot target the living".into()));
    }
    if !target.is_alive() && !spec.targets.allow_dead {
        return Err(GameError::InvalidTarget("cannot target the dead".into()));
    }
    match spec.targets.filter {
        TargetFilter::NonMafia => {
            if target.alignment == Some(Alignment::Mafia) {
                return Err(GameError::InvalidTarget("cannot target mafia".into()));
            }
        }
        TargetFilter::AnyAlive | TargetFilter::None => {}
    }
    Ok(())
}

/// A vote must come from an alive player in the voting phase, at an alive
/// target or as an abstention.
pub fn check_vote(
    state: &RoomState,
    player_id: &str,
    target_id: Option<&str>,
) -> Result<(), GameError> {
    if state.phase != Phase::DayVoting {
        return Err(GameError::WrongPhase);
    }
    let voter = state
        .players
        .get(player_id)
        .ok_or_else(|| GameError::Unauthorized("unknown player".into()))?;
    if !voter.is_alive() {
        return Err(GameError::DeadPlayer);
    }
    if let Some(role) = voter.role_id {
        if !roles::spec(role).voting.can_vote {
            return Err(GameError::Unauthorized("role cannot vote".into()));
        }
    }
    if let Some(target_id) = target_id {
        let target = state
            .players
            .get(target_id)
            .ok_or_else(|| GameError::InvalidTarget("unknown target".into()))?;
        if !target.is_alive() {
            return Err(GameError::InvalidTarget("target is not alive".into()));
        }
    }
    Ok(())
}

/// Host-only actions (start, kick, mute, nudge).
pub fn check_host_action(state: &RoomState, caller_id: &str) -> Result<(), GameError> {
    if caller_id != state.host_id {
        return Err(GameError::Unauthorized("host only".into()));
    }
    Ok(())
}

/// The game starts from the lobby once enough players are present.
pub fn check_start_game(state: &RoomState, caller_id: &str) -> Result<(), GameError> {
    check_host_action(state, caller_id)?;
    if state.phase != Phase::Lobby {
        return Err(GameError::WrongPhase);
    }
    if state.players.len() < state.settings.min_players {
        return Err(GameError::Unauthorized(format!(
            "need at least {} players",
            state.settings.min_players
        )));
    }
    Ok(())
}

/// Joining is lobby-only and bounded by max players.
pub fn check_join(state: &RoomState) -> Result<(), GameError> {
    if state.phase != Phase::Lobby {
        return Err(GameError::WrongPhase);
    }
    if state.players.len() >= state.settings.max_players {
        return Err(GameError::RoomFull);
    }
    Ok(())
}
