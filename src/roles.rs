//! Static role registry: night-action specs, targeting rules, visibility,
//! voting and chat configuration, and win conditions per role.

use crate::types::{Alignment, NightActionType, Phase, PlayerId, PlayerStatus, RoleId};
use rand::seq::SliceRandom;

/// Which players a role's night action may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFilter {
    /// Any alive player who is not mafia-aligned.
    NonMafia,
    /// Any alive player.
    AnyAlive,
    /// Role has no night targeting at all.
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct TargetRules {
    pub allow_self: bool,
    pub allow_alive: bool,
    pub allow_dead: bool,
    pub filter: TargetFilter,
}

#[derive(Debug, Clone, Copy)]
pub struct NightSpec {
    pub action_type: NightActionType,
    pub priority: u8,
    pub max_targets: usize,
    pub target_required: bool,
}

/// How much of the live vote tally a role is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyVisibility {
    Live,
    Final,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct Visibility {
    pub knows_teammates: bool,
    pub sees_vote_tallies: TallyVisibility,
}

#[derive(Debug, Clone, Copy)]
pub struct VotingSpec {
    pub can_vote: bool,
    pub weight: u32,
}

/// Win condition, expressed as the faction that must be eliminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinCondition {
    /// Wins when mafia numbers reach parity with the rest.
    OutnumberTown,
    /// Wins when no mafia remain.
    EliminateMafia,
}

#[derive(Debug, Clone, Copy)]
pub struct RoleSpec {
    pub role_id: RoleId,
    pub alignment: Alignment,
    pub night: Option<NightSpec>,
    pub targets: TargetRules,
    pub visibility: Visibility,
    pub voting: VotingSpec,
    pub win_condition: WinCondition,
}

const MAFIA: RoleSpec = RoleSpec {
    role_id: RoleId::Mafia,
    alignment: Alignment::Mafia,
    night: Some(NightSpec {
        action_type: NightActionType::Kill,
        priority: 10,
        max_targets: 1,
        target_required: true,
    }),
    targets: TargetRules {
        allow_self: false,
        allow_alive: true,
        allow_dead: false,
        filter: TargetFilter::NonMafia,
    },
    visibility: Visibility {
        knows_teammates: true,
        sees_vote_tallies: TallyVisibility::Live,
    },
    voting: VotingSpec {
        can_vote: true,
        weight: 1,
    },
    win_condition: WinCondition::OutnumberTown,
};

const DETECTIVE: RoleSpec = RoleSpec {
    role_id: RoleId::Detective,
    alignment: Alignment::Town,
    night: Some(NightSpec {
        action_type: NightActionType::Investigate,
        priority: 30,
        max_targets: 1,
        target_required: true,
    }),
    targets: TargetRules {
        allow_self: false,
        allow_alive: true,
        allow_dead: false,
        filter: TargetFilter::AnyAlive,
    },
    visibility: Visibility {
        knows_teammates: false,
        sees_vote_tallies: TallyVisibility::Live,
    },
    voting: VotingSpec {
        can_vote: true,
        weight: 1,
    },
    win_condition: WinCondition::EliminateMafia,
};

const DOCTOR: RoleSpec = RoleSpec {
    role_id: RoleId::Doctor,
    alignment: Alignment::Town,
    night: Some(NightSpec {
        action_type: NightActionType::Protect,
        priority: 20,
        max_targets: 1,
        target_required: true,
    }),
    targets: TargetRules {
        // The doctor may protect themselves.
        allow_self: true,
        allow_alive: true,
        allow_dead: false,
        filter: TargetFilter::AnyAlive,
    },
    visibility: Visibility {
        knows_teammates: false,
        sees_vote_tallies: TallyVisibility::Live,
    },
    voting: VotingSpec {
        can_vote: true,
        weight: 1,
    },
    win_condition: WinCondition::EliminateMafia,
};

const TOWNSPERSON: RoleSpec = RoleSpec {
    role_id: RoleId::Townsperson,
    alignment: Alignment::Town,
    night: None,
    targets: TargetRules {
        allow_self: false,
        allow_alive: false,
        allow_dead: false,
        filter: TargetFilter::None,
    },
    visibility: Visibility {
        knows_teammates: false,
        sees_vote_tallies: TallyVisibility::Live,
    },
    voting: VotingSpec {
        can_vote: true,
        weight: 1,
    },
    win_condition: WinCondition::EliminateMafia,
};

/// Look up the static spec for a role.
pub fn spec(role: RoleId) -> &'static RoleSpec {
    match role {
        RoleId::Mafia => &MAFIA,
        RoleId::Detective => &DETECTIVE,
        RoleId::Doctor => &DOCTOR,
        RoleId::Townsperson => &TOWNSPERSON,
    }
}

/// Chat channels carried by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatChannel {
    Day,
    NightMafia,
    Dead,
    Lobby,
}

/// Whether a player may speak on `channel` given the current phase.
/// Messages failing this check are dropped silently.
pub fn can_speak(role: Option<RoleId>, status: PlayerStatus, phase: Phase, channel: ChatChannel) -> bool {
    match channel {
        ChatChannel::Lobby => phase == Phase::Lobby,
        ChatChannel::Dead => status == PlayerStatus::Dead,
        ChatChannel::Day => {
            status == PlayerStatus::Alive
                && matches!(phase, Phase::DayAnnouncement | Phase::DayDiscussion | Phase::DayVoting)
        }
        ChatChannel::NightMafia => {
            status == PlayerStatus::Alive && phase == Phase::Night && role == Some(RoleId::Mafia)
        }
    }
}

/// Whether a player may read `channel` given the current phase.
pub fn can_read(role: Option<RoleId>, status: PlayerStatus, phase: Phase, channel: ChatChannel) -> bool {
    match channel {
        // Dead players see everything; the day channel is public.
        ChatChannel::Lobby | ChatChannel::Day => true,
        ChatChannel::Dead => status == PlayerStatus::Dead,
        ChatChannel::NightMafia => {
            status == PlayerStatus::Dead
                || (role == Some(RoleId::Mafia) && phase == Phase::Night)
        }
    }
}

/// Deal roles for a fresh game: 1 detective always, 1 doctor from five
/// players up, `max(1, n/3)` mafia, the remainder townsperson.
/// Assignment order is shuffled so the mapping is unpredictable.
pub fn distribute(player_ids: &[PlayerId]) -> Vec<(PlayerId, RoleId)> {
    let n = player_ids.len();
    let mafia_count = std::cmp::max(1, n / 3);

    let mut deck: Vec<RoleId> = Vec::with_capacity(n);
    deck.resize(mafia_count, RoleId::Mafia);
    deck.push(RoleId::Detective);
    if n >= 5 {
        deck.push(RoleId::Doctor);
    }
    while deck.len() < n {
        deck.push(RoleId::Townsperson);
    }

    let mut shuffled: Vec<PlayerId> = player_ids.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    shuffled.into_iter().zip(deck).collect()
}
