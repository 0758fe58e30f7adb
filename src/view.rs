//! Redaction: build the per-player view of a room, provably free of
//! information the viewer must not see. Every produced view passes the
//! safety check in all builds; a violation is a fatal internal error.

use crate::error::GameError;
use crate::roles::{self, TallyVisibility};
use crate::types::{
    Alignment, Investigation, NightActionType, Phase, PhaseTimer, PlayerId, PlayerStatus, RoleId,
    RoomSettings, RoomState, VictoryCondition,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afk_strikes: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfRole {
    pub role_id: RoleId,
    pub alignment: Alignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teammates: Option<Vec<PlayerId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub player_id: PlayerId,
    pub target_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockedAction {
    #[serde(rename = "type")]
    pub action_type: NightActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
}

/// The redacted, per-player projection of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: String,
    pub code: String,
    pub phase: Phase,
    pub timer: Option<PhaseTimer>,
    pub settings: RoomSettings,
    pub host_id: PlayerId,
    pub is_host: bool,
    pub public_narrative: Vec<String>,
    pub victory_condition: VictoryCondition,
    pub protocol_version: u32,
    pub players: HashMap<PlayerId, PlayerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_role: Option<SelfRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<Vec<VoteView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation_results: Option<Vec<Investigation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_action: Option<LockedAction>,
}

fn role_visible_to(state: &RoomState, viewer: &str, player_id: &str) -> bool {
    if viewer == player_id || state.phase == Phase::Ended {
        return true;
    }
    state.settings.reveal_roles_on_death
        && state
            .players
            .get(player_id)
            .map(|p| p.status == PlayerStatus::Dead)
            .unwrap_or(false)
}

/// Whether the viewer's role gets to see the votes map in this phase.
/// `Live` roles follow the live tally during voting; `Final` roles only see
/// the outcome after resolution; `None` roles wait for the end of the game.
fn votes_visible(state: &RoomState, tally_visibility: TallyVisibility) -> bool {
    match state.phase {
        Phase::DayVoting => {
            tally_visibility == TallyVisibility::Live && !state.settings.anonymous_voting
        }
        Phase::DayAnnouncement | Phase::DayDiscussion => {
            tally_visibility != TallyVisibility::None && !state.votes.is_empty()
        }
        Phase::Ended => true,
        _ => false,
    }
}

/// Build the viewer's redacted projection of `state`.
///
/// Runs [`verify_view`] on the result; a failed check means the redaction
/// itself is broken and surfaces as an internal error.
pub fn render_view(state: &RoomState, viewer: &str) -> Result<RoomView, GameError> {
    let viewer_player = state.players.get(viewer);
    let viewer_is_host = viewer == state.host_id;

    let players = state
        .players
        .values()
        .map(|p| {
            let strikes_visible = p.id == viewer || viewer_is_host;
            (
                p.id.clone(),
                PlayerView {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    status: p.status,
                    connected: p.connected,
                    role_id: if role_visible_to(state, viewer, &p.id) {
                        p.role_id
                    } else {
                        None
                    },
                    afk_strikes: strikes_visible.then_some(p.afk_strikes),
                },
            )
        })
        .collect();

    let self_role = viewer_player.and_then(|p| {
        let role_id = p.role_id?;
        let alignment = p.alignment?;
        let teammates = (alignment == Alignment::Mafia).then(|| {
            state
                .players
                .values()
                .filter(|other| {
                    other.id != p.id && other.alignment == Some(Alignment::Mafia)
                })
                .map(|other| other.id.clone())
                .collect()
        });
        Some(SelfRole {
            role_id,
            alignment,
            teammates,
        })
    });

    let tally_visibility = viewer_player
        .and_then(|p| p.role_id)
        .map(|role| roles::spec(role).visibility.sees_vote_tallies)
        .unwrap_or(TallyVisibility::Live);
    let votes = votes_visible(state, tally_visibility).then(|| {
        let mut list: Vec<VoteView> = state
            .votes
            .values()
            .map(|v| VoteView {
                player_id: v.player_id.clone(),
                target_id: v.target_id.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        list
    });

    let investigation_results = viewer_player
        .filter(|p| p.role_id == Some(RoleId::Detective))
        .map(|_| {
            state
                .investigation_results
                .iter()
                .filter(|inv| inv.investigator_id == viewer)
                .cloned()
                .collect()
        });

    let locked_action = (state.phase == Phase::Night)
        .then(|| {
            state
                .night_actions
                .values()
                .find(|a| a.player_id == viewer)
                .map(|a| LockedAction {
                    action_type: a.action_type,
                    target_id: a.target_id.clone(),
                })
        })
        .flatten();

    let view = RoomView {
        room_id: state.id.clone(),
        code: state.code.clone(),
        phase: state.phase,
        timer: state.timer.clone(),
        settings: state.settings.clone(),
        host_id: state.host_id.clone(),
        is_host: viewer_is_host,
        public_narrative: state.public_narrative.clone(),
        victory_condition: state.victory_condition,
        protocol_version: state.protocol_version,
        players,
        self_role,
        votes,
        investigation_results,
        locked_action,
    };

    if let Err(violation) = verify_view(&view, state, viewer) {
        tracing::error!(room = %state.id, viewer, %violation, "redaction safety check failed");
        return Err(GameError::Internal(format!(
            "redaction safety check failed: {violation}"
        )));
    }
    Ok(view)
}

/// Assert the view leaks nothing: no role for an alive non-viewer outside the
/// settings-gated paths, no foreign investigation entries, no teammates list
/// for non-mafia viewers.
pub fn verify_view(view: &RoomView, state: &RoomState, viewer: &str) -> Result<(), String> {
    for player in view.players.values() {
        if player.id == viewer || player.role_id.is_none() {
            continue;
        }
        let dead_reveal = state.settings.reveal_roles_on_death
            && player.status == PlayerStatus::Dead;
        if state.phase != Phase::Ended && !dead_reveal {
            return Err(format!("role of alive player {} exposed", player.id));
        }
    }

    if let Some(results) = &view.investigation_results {
        if results.iter().any(|inv| inv.investigator_id != viewer) {
            return Err("foreign investigation result exposed".to_string());
        }
    }

    if let Some(self_role) = &view.self_role {
        if let Some(teammates) = &self_role.teammates {
            if self_role.alignment != Alignment::Mafia {
                return Err("teammates exposed to non-mafia viewer".to_string());
            }
            if teammates.iter().any(|id| id == viewer) {
                return Err("viewer listed among own teammates".to_string());
            }
        }
    }

    Ok(())
}
