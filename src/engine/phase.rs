use crate::types::{NightActionType, Phase, PhaseTimer, RoleId, RoomState, VictoryCondition};

/// Day announcement runs on a fixed timer.
pub const DAY_ANNOUNCEMENT_MS: i64 = 30_000;

/// Result of a phase advancement.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseChange {
    pub phase: Phase,
    pub timer: Option<PhaseTimer>,
    pub victory: VictoryCondition,
}

fn next_phase(current: Phase) -> Phase {
    match current {
        Phase::Lobby => Phase::Night,
        Phase::Night => Phase::DayAnnouncement,
        Phase::DayAnnouncement => Phase::DayDiscussion,
        Phase::DayDiscussion => Phase::DayVoting,
        Phase::DayVoting => Phase::Night,
        Phase::Ended => Phase::Ended,
    }
}

fn phase_duration_ms(phase: Phase, state: &RoomState) -> i64 {
    match phase {
        Phase::Night => state.settings.night_duration_ms,
        Phase::DayAnnouncement => DAY_ANNOUNCEMENT_MS,
        Phase::DayDiscussion => state.settings.day_duration_ms,
        Phase::DayVoting => state.settings.vote_duration_ms,
        Phase::Lobby | Phase::Ended => 0,
    }
}

/// Advance the room to the next phase in the linear progression, re-checking
/// victory first. Ephemeral maps are left alone; the resolution steps own
/// their clearing.
pub fn advance_phase(state: &mut RoomState, now: i64) -> PhaseChange {
    let victory = super::apply_victory(state);
    if victory != VictoryCondition::None {
        state.last_snapshot = now;
        return PhaseChange {
            phase: Phase::Ended,
            timer: None,
            victory,
        };
    }

    let phase = next_phase(state.phase);
    state.phase = phase;
    state.timer = if phase.is_untimed() {
        None
    } else {
        Some(PhaseTimer {
            phase,
            started_at: now,
            ends_at: now + phase_duration_ms(phase, state),
        })
    };
    state.last_snapshot = now;

    PhaseChange {
        phase,
        timer: state.timer.clone(),
        victory: VictoryCondition::None,
    }
}

/// Early-completion predicate for the night phase: every alive mafia and
/// every alive detective has submitted; the doctor's action is optional.
pub fn night_complete(state: &RoomState) -> bool {
    state
        .alive_players()
        .filter(|p| matches!(p.role_id, Some(RoleId::Mafia) | Some(RoleId::Detective)))
        .all(|p| {
            state
                .night_actions
                .values()
                .any(|a| a.player_id == p.id)
        })
}

/// Early-completion predicate for day voting: every alive player has voted
/// or abstained.
pub fn voting_complete(state: &RoomState) -> bool {
    state
        .alive_players()
        .all(|p| state.votes.values().any(|v| v.player_id == p.id))
}

/// Give one AFK strike (cap 3) to each alive player whose required
/// submission never arrived before the timer expired.
pub fn accrue_afk_strikes(state: &mut RoomState) {
    let missing: Vec<String> = match state.phase {
        Phase::Night => state
            .alive_players()
            .filter(|p| matches!(p.role_id, Some(RoleId::Mafia) | Some(RoleId::Detective)))
            .filter(|p| !state.night_actions.values().any(|a| a.player_id == p.id))
            .map(|p| p.id.clone())
            .collect(),
        Phase::DayVoting => state
            .alive_players()
            .filter(|p| !state.votes.values().any(|v| v.player_id == p.id))
            .map(|p| p.id.clone())
            .collect(),
        _ => Vec::new(),
    };
    for id in missing {
        if let Some(player) = state.players.get_mut(&id) {
            player.afk_strikes = std::cmp::min(player.afk_strikes + 1, 3);
        }
    }
}
