use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type ActionId = String;
pub type SessionId = String;

/// Wire protocol version; bumped on breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Room code alphabet with ambiguous characters (0, 1, I, O) excluded.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a 16-byte random id rendered as lowercase hex.
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Generate a 6-character room code from the restricted alphabet.
pub fn new_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Night,
    DayAnnouncement,
    DayDiscussion,
    DayVoting,
    Ended,
}

impl Phase {
    /// Whether this phase runs without a timer.
    pub fn is_untimed(self) -> bool {
        matches!(self, Phase::Lobby | Phase::Ended)
    }
}

/// Active phase timer on the monotonic wall clock (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimer {
    pub phase: Phase,
    pub started_at: i64,
    pub ends_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VotingMode {
    Majority,
    Plurality,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub night_duration_ms: i64,
    pub day_duration_ms: i64,
    pub vote_duration_ms: i64,
    pub reveal_roles_on_death: bool,
    pub anonymous_voting: bool,
    pub voting_mode: VotingMode,
    pub min_players: usize,
    pub max_players: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            night_duration_ms: 60_000,
            day_duration_ms: 120_000,
            vote_duration_ms: 60_000,
            reveal_roles_on_death: true,
            anonymous_voting: false,
            voting_mode: VotingMode::Majority,
            min_players: 3,
            max_players: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoleId {
    Mafia,
    Detective,
    Doctor,
    Townsperson,
}

impl RoleId {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleId::Mafia => "mafia",
            RoleId::Detective => "detective",
            RoleId::Doctor => "doctor",
            RoleId::Townsperson => "townsperson",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Mafia,
    Town,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Alive,
    Dead,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    pub status: PlayerStatus,
    pub connected: bool,
    pub afk_strikes: u8,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Player {
    pub fn new(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name,
            role_id: None,
            alignment: None,
            status: PlayerStatus::Alive,
            connected: true,
            afk_strikes: 0,
            muted: false,
            session_id: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == PlayerStatus::Alive
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NightActionType {
    Kill,
    Protect,
    Investigate,
    None,
}

impl NightActionType {
    /// Resolution priority: kills land first, protects may cancel them,
    /// investigations observe the pre-dawn state.
    pub fn priority(self) -> u8 {
        match self {
            NightActionType::Kill => 10,
            NightActionType::Protect => 20,
            NightActionType::Investigate => 30,
            NightActionType::None => 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NightAction {
    pub id: String,
    pub action_id: ActionId,
    pub player_id: PlayerId,
    #[serde(rename = "type")]
    pub action_type: NightActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PlayerId>,
    pub submitted_at: i64,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub action_id: ActionId,
    pub player_id: PlayerId,
    /// None means abstain.
    pub target_id: Option<PlayerId>,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Investigation {
    pub investigator_id: PlayerId,
    pub target_id: PlayerId,
    pub is_mafia: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VictoryCondition {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "mafia-victory")]
    MafiaVictory,
    #[serde(rename = "town-victory")]
    TownVictory,
}

/// Authoritative room state. Everything the reducers, policy gate, and
/// redaction layer work on; serialised as-is into the room store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub id: RoomId,
    pub code: String,
    pub host_id: PlayerId,
    pub phase: Phase,
    pub timer: Option<PhaseTimer>,
    pub settings: RoomSettings,
    pub players: HashMap<PlayerId, Player>,
    pub night_actions: HashMap<ActionId, NightAction>,
    pub votes: HashMap<ActionId, Vote>,
    pub investigation_results: Vec<Investigation>,
    pub public_narrative: Vec<String>,
    pub victory_condition: VictoryCondition,
    pub protocol_version: u32,
    pub last_snapshot: i64,
}

impl RoomState {
    pub fn new(id: RoomId, code: String, host: Player) -> Self {
        let host_id = host.id.clone();
        let mut players = HashMap::new();
        players.insert(host_id.clone(), host);
        Self {
            id,
            code,
            host_id,
            phase: Phase::Lobby,
            timer: None,
            settings: RoomSettings::default(),
            players,
            night_actions: HashMap::new(),
            votes: HashMap::new(),
            investigation_results: Vec::new(),
            public_narrative: Vec::new(),
            victory_condition: VictoryCondition::None,
            protocol_version: PROTOCOL_VERSION,
            last_snapshot: now_ms(),
        }
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_alive())
    }

    pub fn alive_count(&self) -> usize {
        self.alive_players().count()
    }

    pub fn alive_with_alignment(&self, alignment: Alignment) -> usize {
        self.alive_players()
            .filter(|p| p.alignment == Some(alignment))
            .count()
    }

    /// The game is in one of the in-progress phases (roles assigned).
    pub fn in_game(&self) -> bool {
        !matches!(self.phase, Phase::Lobby | Phase::Ended)
    }
}

/// Validate a player or host display name (3 to 15 characters).
pub fn valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (3..=15).contains(&len)
}

/// Validate a room code: exactly six characters from the restricted alphabet.
pub fn valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}
