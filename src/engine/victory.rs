use crate::types::{Alignment, RoomState, VictoryCondition};

/// Evaluate the victory condition over the current alive set.
pub fn check_victory(state: &RoomState) -> VictoryCondition {
    let mafia = state.alive_with_alignment(Alignment::Mafia);
    let town = state.alive_with_alignment(Alignment::Town);
    let neutral = state.alive_with_alignment(Alignment::Neutral);

    if mafia >= town + neutral && mafia > 0 {
        VictoryCondition::MafiaVictory
    } else if mafia == 0 {
        VictoryCondition::TownVictory
    } else {
        VictoryCondition::None
    }
}

/// Check victory and, when decided, move the room to its terminal state.
/// Returns the condition either way.
pub fn apply_victory(state: &mut RoomState) -> VictoryCondition {
    let result = check_victory(state);
    if result != VictoryCondition::None {
        state.victory_condition = result;
        state.phase = crate::types::Phase::Ended;
        state.timer = None;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, Phase, Player, PlayerStatus, RoleId, RoomState};

    fn room(mafia: usize, town: usize) -> RoomState {
        let mut state = RoomState::new(new_id(), "ABCDEF".into(), Player::new("host".into(), "Host-name".into()));
        state.players.clear();
        let mut first = None;
        for i in 0..mafia {
            let id = format!("m{i}");
            first.get_or_insert(id.clone());
            let mut p = Player::new(id.clone(), id.clone());
            p.role_id = Some(RoleId::Mafia);
            p.alignment = Some(Alignment::Mafia);
            state.players.insert(id, p);
        }
        for i in 0..town {
            let id = format!("t{i}");
            first.get_or_insert(id.clone());
            let mut p = Player::new(id.clone(), id.clone());
            p.role_id = Some(RoleId::Townsperson);
            p.alignment = Some(Alignment::Town);
            state.players.insert(id, p);
        }
        state.host_id = first.unwrap();
        state.phase = Phase::Night;
        state.timer = Some(crate::types::PhaseTimer {
            phase: Phase::Night,
            started_at: 0,
            ends_at: 1,
        });
        state
    }

    #[test]
    fn test_game_continues() {
        assert_eq!(check_victory(&room(1, 3)), VictoryCondition::None);
    }

    #[test]
    fn test_mafia_parity_wins() {
        assert_eq!(check_victory(&room(2, 2)), VictoryCondition::MafiaVictory);
        assert_eq!(check_victory(&room(3, 2)), VictoryCondition::MafiaVictory);
    }

    #[test]
    fn test_town_wins_when_mafia_gone() {
        let mut state = room(1, 3);
        state.players.get_mut("m0").unwrap().status = PlayerStatus::Dead;
        assert_eq!(check_victory(&state), VictoryCondition::TownVictory);
    }

    #[test]
    fn test_apply_victory_ends_room() {
        let mut state = room(2, 2);
        let result = apply_victory(&mut state);
        assert_eq!(result, VictoryCondition::MafiaVictory);
        assert_eq!(state.phase, Phase::Ended);
        assert_eq!(state.timer, None);
        assert_eq!(state.victory_condition, VictoryCondition::MafiaVictory);
    }

    #[test]
    fn test_apply_victory_no_op_mid_game() {
        let mut state = room(1, 3);
        let result = apply_victory(&mut state);
        assert_eq!(result, VictoryCondition::None);
        assert_eq!(state.phase, Phase::Night);
        assert!(state.timer.is_some());
    }

    #[test]
    fn test_dead_players_do_not_count() {
        let mut state = room(2, 3);
        state.players.get_mut("t0").unwrap().status = PlayerStatus::Dead;
        // 2 mafia vs 2 town alive.
        assert_eq!(check_victory(&state), VictoryCondition::MafiaVictory);
    }
}
