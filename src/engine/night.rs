use crate::types::{
    Alignment, Investigation, NightAction, NightActionType, PlayerId, PlayerStatus, RoleId,
    RoomState,
};

/// Outcome of a night resolution, for event publication.
#[derive(Debug, Clone, PartialEq)]
pub struct NightSummary {
    /// Player killed this night, if the kill went through.
    pub death: Option<PlayerId>,
    /// Public narrative line appended to the room.
    pub narrative: String,
    /// Investigation results produced this night (already appended to state).
    pub investigations: Vec<Investigation>,
}

/// Resolve the night phase in place.
///
/// Actions are replayed in `(priority, submitted_at, action_id)` order so the
/// same action set produces the same outcome on any instance. At most one
/// kill is queued per night; a protect on the queued target cancels it.
pub fn resolve_night(state: &mut RoomState) -> NightSummary {
    let mut actions: Vec<NightAction> = state.night_actions.values().cloned().collect();
    actions.sort_by(|a, b| {
        (a.priority, a.submitted_at, &a.action_id).cmp(&(b.priority, b.submitted_at, &b.action_id))
    });

    let mut queued_kill: Option<PlayerId> = None;
    let mut investigations = Vec::new();

    for action in &actions {
        let Some(target_id) = action.target_id.as_ref() else {
            continue;
        };
        let (Some(actor), Some(target)) = (
            state.players.get(&action.player_id),
            state.players.get(target_id),
        ) else {
            continue;
        };
        if !actor.is_alive() || !target.is_alive() {
            continue;
        }

        match action.action_type {
            NightActionType::Kill => {
                if actor.role_id == Some(RoleId::Mafia)
                    && target.alignment != Some(Alignment::Mafia)
                {
                    queued_kill = Some(target_id.clone());
                }
            }
            NightActionType::Protect => {
                if actor.role_id == Some(RoleId::Doctor) && queued_kill.as_ref() == Some(target_id)
                {
                    queued_kill = None;
                }
            }
            NightActionType::Investigate => {
                if actor.role_id == Some(RoleId::Detective) {
                    let result = Investigation {
                        investigator_id: actor.id.clone(),
                        target_id: target_id.clone(),
                        is_mafia: target.alignment == Some(Alignment::Mafia),
                    };
                    state.investigation_results.push(result.clone());
                    investigations.push(result);
                }
            }
            NightActionType::None => {}
        }
    }

    let (death, narrative) = match queued_kill {
        Some(victim_id) => {
            let name = match state.players.get_mut(&victim_id) {
                Some(victim) => {
                    victim.status = PlayerStatus::Dead;
                    victim.name.clone()
                }
                None => victim_id.clone(),
            };
            (
                Some(victim_id),
                format!("{name} was eliminated during the night."),
            )
        }
        None => (None, "No one died during the night.".to_string()),
    };

    state.public_narrative.push(narrative.clone());
    state.night_actions.clear();

    NightSummary {
        death,
        narrative,
        investigations,
    }
}
