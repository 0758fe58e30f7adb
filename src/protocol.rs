//! Wire protocol: `event`-discriminated JSON frames in both directions,
//! plus the internal room event envelope fanned out over the store's
//! pub/sub. Payloads are decoded at the transport edge; nothing untyped
//! reaches the policy gate or the reducers.

use crate::error::GameError;
use crate::roles::ChatChannel;
use crate::types::{
    ActionId, Investigation, NightActionType, Phase, PhaseTimer, PlayerId, RoomState, SessionId,
};
use crate::view::RoomView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum chat message length.
pub const MAX_CHAT_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HostActionKind {
    Kick,
    Mute,
    Nudge,
    Start,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ClientMessage {
    #[serde(rename = "room.create", rename_all = "camelCase")]
    RoomCreate { host_name: String },
    #[serde(rename = "room.join", rename_all = "camelCase")]
    RoomJoin {
        room_code: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    #[serde(rename = "session.resume", rename_all = "camelCase")]
    SessionResume {
        room_id: String,
        session_id: SessionId,
        jwt: String,
    },
    #[serde(rename = "action.submit", rename_all = "camelCase")]
    ActionSubmit {
        action_id: ActionId,
        #[serde(rename = "type")]
        action_type: NightActionType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PlayerId>,
    },
    #[serde(rename = "vote.cast", rename_all = "camelCase")]
    VoteCast {
        action_id: ActionId,
        /// None abstains.
        target_id: Option<PlayerId>,
    },
    #[serde(rename = "host.action", rename_all = "camelCase")]
    HostAction {
        action: HostActionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PlayerId>,
    },
    #[serde(rename = "chat.message", rename_all = "camelCase")]
    ChatMessage {
        message_id: String,
        channel: ChatChannel,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ServerMessage {
    #[serde(rename = "room.snapshot", rename_all = "camelCase")]
    RoomSnapshot {
        #[serde(flatten)]
        view: Box<RoomView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        jwt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    #[serde(rename = "phase.change", rename_all = "camelCase")]
    PhaseChange {
        phase: Phase,
        timer: Option<PhaseTimer>,
        night: bool,
    },
    #[serde(rename = "action.ack", rename_all = "camelCase")]
    ActionAck {
        action_id: ActionId,
        #[serde(rename = "type")]
        action_type: NightActionType,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<PlayerId>,
    },
    #[serde(rename = "vote.update", rename_all = "camelCase")]
    VoteUpdate {
        player_id: PlayerId,
        target_id: Option<PlayerId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tallies: Option<HashMap<PlayerId, u32>>,
    },
    #[serde(rename = "night.publicResult", rename_all = "camelCase")]
    NightPublicResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        death: Option<PlayerId>,
        narrative: String,
    },
    #[serde(rename = "detective.result", rename_all = "camelCase")]
    DetectiveResult { result: Investigation },
    #[serde(rename = "lynch.result", rename_all = "camelCase")]
    LynchResult {
        target_id: Option<PlayerId>,
        narrative: String,
    },
    #[serde(rename = "player.status", rename_all = "camelCase")]
    PlayerStatus {
        player_id: PlayerId,
        connected: bool,
        alive: bool,
    },
    #[serde(rename = "chat.message", rename_all = "camelCase")]
    ChatMessage {
        message_id: String,
        channel: ChatChannel,
        player_id: PlayerId,
        player_name: String,
        content: String,
    },
    #[serde(rename = "host.nudge", rename_all = "camelCase")]
    HostNudge { message: String },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },
    #[serde(rename = "session.evicted", rename_all = "camelCase")]
    SessionEvicted { reason: String, message: String },
}

impl ServerMessage {
    pub fn error(err: &GameError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
            context: None,
        }
    }
}

/// Internal event envelope carried on the room's pub/sub channel. Every
/// subscriber receives the raw authoritative state and performs its own
/// redaction; nothing pre-redacted crosses instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A state commit; subscribers render and push a fresh snapshot.
    Committed { state: Box<RoomState> },
    Phase {
        phase: Phase,
        timer: Option<PhaseTimer>,
    },
    NightResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        death: Option<PlayerId>,
        narrative: String,
    },
    InvestigationReady {
        investigator_id: PlayerId,
        result: Investigation,
    },
    Lynch {
        target_id: Option<PlayerId>,
        narrative: String,
    },
    VoteCast {
        player_id: PlayerId,
        target_id: Option<PlayerId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tallies: Option<HashMap<PlayerId, u32>>,
    },
    PlayerStatus {
        player_id: PlayerId,
        connected: bool,
        alive: bool,
    },
    Chat {
        message_id: String,
        channel: ChatChannel,
        player_id: PlayerId,
        player_name: String,
        content: String,
    },
    Nudge {
        target_id: PlayerId,
        message: String,
    },
    Evicted {
        player_id: PlayerId,
        socket_id: String,
        reason: String,
    },
}
