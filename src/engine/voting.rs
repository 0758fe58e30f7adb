use crate::roles;
use crate::types::{PlayerId, PlayerStatus, RoomState, VotingMode};
use std::collections::HashMap;

/// Outcome of a voting resolution, for event publication.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingSummary {
    /// Player lynched this round, if the vote carried.
    pub lynched: Option<PlayerId>,
    /// Public narrative line appended to the room.
    pub narrative: String,
    /// Final per-candidate weighted tally.
    pub tallies: HashMap<PlayerId, u32>,
}

/// Compute the weighted tally for the current vote set. Every alive player
/// starts at zero; abstentions and votes at dead targets do not count.
pub fn tally(state: &RoomState) -> HashMap<PlayerId, u32> {
    let mut counts: HashMap<PlayerId, u32> = state
        .alive_players()
        .map(|p| (p.id.clone(), 0))
        .collect();

    for vote in state.votes.values() {
        let Some(target_id) = vote.target_id.as_ref() else {
            continue;
        };
        if !counts.contains_key(target_id) {
            continue;
        }
        let weight = state
            .players
            .get(&vote.player_id)
            .and_then(|p| p.role_id)
            .map(|r| roles::spec(r).voting.weight)
            .unwrap_or(1);
        if let Some(count) = counts.get_mut(target_id) {
            *count += weight;
        }
    }
    counts
}

/// Resolve the voting phase in place.
pub fn resolve_voting(state: &mut RoomState) -> VotingSummary {
    let counts = tally(state);
    let alive = state.alive_count();

    let selected = match state.settings.voting_mode {
        VotingMode::Majority => {
            let threshold = (alive / 2) as u32 + 1;
            sole_max_at_least(&counts, threshold)
        }
        VotingMode::Plurality => sole_max_at_least(&counts, 1),
    };

    let narrative = match &selected {
        Some(target_id) => {
            let votes_for = counts.get(target_id).copied().unwrap_or(0);
            let (name, role) = match state.players.get_mut(target_id) {
                Some(target) => {
                    target.status = PlayerStatus::Dead;
                    (target.name.clone(), target.role_id)
                }
                None => (target_id.clone(), None),
            };
            let mut line = format!("{name} was lynched with {votes_for} votes.");
            if state.settings.reveal_roles_on_death {
                if let Some(role) = role {
                    line.push_str(&format!(" They were a {}.", role.as_str()));
                }
            }
            line
        }
        None => "No one was lynched. The town could not reach a decision.".to_string(),
    };

    state.public_narrative.push(narrative.clone());
    state.votes.clear();

    VotingSummary {
        lynched: selected,
        narrative,
        tallies: counts,
    }
}

/// The single candidate with the strictly highest count, provided that count
/// meets `threshold`. A tie for the top yields no candidate.
fn sole_max_at_least(counts: &HashMap<PlayerId, u32>, threshold: u32) -> Option<PlayerId> {
    let max = counts.values().copied().max()?;
    if max < threshold {
        return None;
    }
    let mut at_max = counts.iter().filter(|(_, c)| **c == max);
    let candidate = at_max.next()?;
    if at_max.next().is_some() {
        return None;
    }
    Some(candidate.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, Alignment, Phase, Player, RoleId, RoomState, Vote};

    fn room(n_town: usize) -> RoomState {
        let mut state = RoomState::new(new_id(), "ABCDEF".into(), Player::new("m".into(), "M-name".into()));
        state.host_id = "m".into();
        {
            let mafia = state.players.get_mut("m").unwrap();
            mafia.role_id = Some(RoleId::Mafia);
            mafia.alignment = Some(Alignment::Mafia);
        }
        for i in 1..=n_town {
            let id = format!("t{i}");
            let mut p = Player::new(id.clone(), format!("{id}-name"));
            p.role_id = Some(RoleId::Townsperson);
            p.alignment = Some(Alignment::Town);
            state.players.insert(id, p);
        }
        state.phase = Phase::DayVoting;
        state
    }

    fn cast(state: &mut RoomState, voter: &str, target: Option<&str>) {
        let action_id = new_id();
        state.votes.insert(
            action_id.clone(),
            Vote {
                id: new_id(),
                action_id,
                player_id: voter.to_string(),
                target_id: target.map(|t| t.to_string()),
                submitted_at: crate::types::now_ms(),
            },
        );
    }

    #[test]
    fn test_majority_lynch() {
        // 5 alive, threshold 3; M receives 3 votes.
        let mut state = room(4);
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "t2", Some("m"));
        cast(&mut state, "t3", Some("m"));
        cast(&mut state, "m", Some("t1"));
        cast(&mut state, "t4", None);

        let summary = resolve_voting(&mut state);

        assert_eq!(summary.lynched, Some("m".to_string()));
        assert_eq!(state.players["m"].status, PlayerStatus::Dead);
        assert!(summary
            .narrative
            .starts_with("M-name was lynched with 3 votes."));
        assert!(summary.narrative.ends_with(" They were a mafia."));
        assert!(state.votes.is_empty());
    }

    #[test]
    fn test_majority_below_threshold_no_lynch() {
        // 5 alive, threshold 3; top candidate only has 2.
        let mut state = room(4);
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "t2", Some("m"));
        cast(&mut state, "t3", None);
        cast(&mut state, "t4", None);

        let summary = resolve_voting(&mut state);

        assert_eq!(summary.lynched, None);
        assert_eq!(
            summary.narrative,
            "No one was lynched. The town could not reach a decision."
        );
    }

    #[test]
    fn test_majority_tie_no_lynch() {
        let mut state = room(3); // 4 alive, threshold 3
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "t2", Some("m"));
        cast(&mut state, "t3", Some("t1"));
        cast(&mut state, "m", Some("t1"));

        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, None);
        assert!(state.players.values().all(|p| p.is_alive()));
    }

    #[test]
    fn test_plurality_strict_max_wins() {
        let mut state = room(4);
        state.settings.voting_mode = VotingMode::Plurality;
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "t2", Some("m"));
        cast(&mut state, "m", Some("t1"));

        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, Some("m".to_string()));
    }

    #[test]
    fn test_plurality_tie_no_lynch() {
        let mut state = room(4);
        state.settings.voting_mode = VotingMode::Plurality;
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "m", Some("t1"));

        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, None);
    }

    #[test]
    fn test_all_abstain_no_lynch() {
        let mut state = room(4);
        for voter in ["m", "t1", "t2", "t3", "t4"] {
            cast(&mut state, voter, None);
        }
        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, None);
        assert!(summary.tallies.values().all(|c| *c == 0));
    }

    #[test]
    fn test_votes_at_dead_targets_ignored() {
        let mut state = room(4);
        state.players.get_mut("t4").unwrap().status = PlayerStatus::Dead;
        cast(&mut state, "t1", Some("t4"));
        cast(&mut state, "t2", Some("t4"));
        cast(&mut state, "t3", Some("t4"));

        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, None);
        assert!(!summary.tallies.contains_key("t4"));
    }

    #[test]
    fn test_reveal_roles_off_hides_role() {
        let mut state = room(4);
        state.settings.reveal_roles_on_death = false;
        cast(&mut state, "t1", Some("m"));
        cast(&mut state, "t2", Some("m"));
        cast(&mut state, "t3", Some("m"));

        let summary = resolve_voting(&mut state);
        assert_eq!(summary.lynched, Some("m".to_string()));
        assert!(!summary.narrative.contains("They were"));
    }

    #[test]
    fn test_tally_includes_every_alive_player() {
        let state = room(2);
        let counts = tally(&state);
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|c| *c == 0));
    }
}
