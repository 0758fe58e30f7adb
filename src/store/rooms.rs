//! Room persistence: code reservation, validated commits with optimistic
//! concurrency, snapshot checkpoints, and the capped recovery event stream.

use super::{events_key, room_channel, room_code_key, room_key, snapshot_key, Kv};
use crate::error::{GameError, StoreError, StoreResult};
use crate::types::{new_id, new_room_code, now_ms, Phase, Player, RoomId, RoomState};
use std::sync::Arc;
use std::time::Duration;

/// Rooms and their code mapping idle out after 24 hours.
pub const ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Recovery event stream cap.
const EVENT_CAP: usize = 50;

/// How many code collisions we tolerate before giving up.
const CODE_ATTEMPTS: usize = 16;

/// Commit retry budget for the safe-update path.
const COMMIT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct RoomStore {
    kv: Arc<dyn Kv>,
}

impl RoomStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Create a room with its host player, reserving a unique code
    /// atomically. On collision a fresh code is generated and retried; if
    /// the room write fails afterwards the reservation is compensated away.
    pub async fn create_room(&self, host_name: &str) -> Result<RoomState, GameError> {
        let room_id = new_id();
        let host = Player::new(new_id(), host_name.to_string());

        let code = self.reserve_code(&room_id).await?;
        let state = RoomState::new(room_id.clone(), code.clone(), host);

        if let Err(err) = self.write_initial(&state).await {
            // Give the code back; the room never existed.
            let _ = self.kv.delete(&room_code_key(&code)).await;
            return Err(err.into());
        }
        tracing::info!(room = %room_id, code = %code, "room created");
        Ok(state)
    }

    async fn reserve_code(&self, room_id: &str) -> Result<String, GameError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = new_room_code();
            if self
                .kv
                .put_if_absent(&room_code_key(&code), room_id, Some(ROOM_TTL))
                .await
                .map_err(GameError::from)?
            {
                return Ok(code);
            }
        }
        Err(GameError::Internal("room code space exhausted".into()))
    }

    async fn write_initial(&self, state: &RoomState) -> StoreResult<()> {
        validate(state, &state.host_id)?;
        let json = serde_json::to_string(state)?;
        if !self
            .kv
            .put_if_absent(&room_key(&state.id), &json, Some(ROOM_TTL))
            .await?
        {
            return Err(StoreError::WriteLoss {
                key: room_key(&state.id),
            });
        }
        Ok(())
    }

    pub async fn find_room_by_code(&self, code: &str) -> StoreResult<Option<RoomId>> {
        Ok(self
            .kv
            .get(&room_code_key(code))
            .await?
            .map(|v| v.value))
    }

    /// Load a room together with its store revision for a later
    /// revision-checked write.
    pub async fn get_room_state(&self, room_id: &str) -> StoreResult<Option<(RoomState, u64)>> {
        match self.kv.get(&room_key(room_id)).await? {
            Some(versioned) => {
                let state: RoomState = serde_json::from_str(&versioned.value)?;
                Ok(Some((state, versioned.revision)))
            }
            None => Ok(None),
        }
    }

    /// Commit a state read at `expected_revision`. Fails with `WriteLoss`
    /// when the store has changed since the read. Every commit revalidates
    /// invariants, refreshes TTLs, checkpoints a snapshot, appends to the
    /// recovery stream, and fans the raw state out to subscribers.
    pub async fn update_room_state(
        &self,
        room_id: &str,
        state: &mut RoomState,
        expected_revision: u64,
    ) -> StoreResult<u64> {
        // Preserve hostId from the pre-image before validating; a command
        // must never change the host.
        if let Some(pre) = self.kv.get(&room_key(room_id)).await? {
            let pre_state: RoomState = serde_json::from_str(&pre.value)?;
            state.host_id = pre_state.host_id;
        }
        validate(state, &state.host_id)?;

        state.last_snapshot = now_ms();
        let json = serde_json::to_string(&state)?;
        let revision = self
            .kv
            .put_if_revision(&room_key(room_id), expected_revision, &json, Some(ROOM_TTL))
            .await?;

        let _ = self.kv.expire(&room_code_key(&state.code), ROOM_TTL).await;
        let _ = self.kv.put(&snapshot_key(room_id), &json, Some(ROOM_TTL)).await;
        let _ = self
            .kv
            .push_capped(&events_key(room_id), &json, EVENT_CAP, Some(ROOM_TTL))
            .await;

        // Fan the raw committed state out; every subscriber redacts for its
        // own viewer.
        let event = crate::protocol::RoomEvent::Committed {
            state: Box::new(state.clone()),
        };
        if let Ok(payload) = serde_json::to_string(&event) {
            let _ = self.kv.publish(&room_channel(room_id), &payload).await;
        }

        Ok(revision)
    }

    /// Load, mutate, validate, and commit atomically; retried on concurrent
    /// writes up to three times. The mutator's value is returned alongside
    /// the committed state.
    pub async fn update_room_state_safe<R, F>(
        &self,
        room_id: &str,
        mut mutator: F,
    ) -> Result<(R, RoomState), GameError>
    where
        F: FnMut(&mut RoomState) -> Result<R, GameError>,
    {
        for attempt in 0..COMMIT_ATTEMPTS {
            let (mut state, revision) = self
                .get_room_state(room_id)
                .await
                .map_err(GameError::from)?
                .ok_or(GameError::RoomNotFound)?;

            let outcome = mutator(&mut state)?;

            match self.update_room_state(room_id, &mut state, revision).await {
                Ok(_) => return Ok((outcome, state)),
                Err(StoreError::WriteLoss { .. }) if attempt + 1 < COMMIT_ATTEMPTS => {
                    tracing::debug!(room = %room_id, attempt, "commit conflict, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(GameError::Internal("commit retries exhausted".into()))
    }

    pub async fn delete_room(&self, room_id: &str) -> StoreResult<()> {
        if let Some((state, _)) = self.get_room_state(room_id).await? {
            let _ = self.kv.delete(&room_code_key(&state.code)).await;
        }
        let _ = self.kv.delete(&room_key(room_id)).await;
        let _ = self.kv.delete(&snapshot_key(room_id)).await;
        Ok(())
    }

    /// Recovery stream for a room, oldest first.
    pub async fn recent_events(&self, room_id: &str) -> StoreResult<Vec<RoomState>> {
        let raw = self.kv.list(&events_key(room_id)).await?;
        let mut states = Vec::with_capacity(raw.len());
        for item in raw {
            states.push(serde_json::from_str(&item)?);
        }
        Ok(states)
    }
}

/// Schema validation run on every write. Rejections are internal errors:
/// the policy gate should have caught anything user-triggerable.
fn validate(state: &RoomState, pre_image_host: &str) -> StoreResult<()> {
    if state.host_id != pre_image_host {
        return Err(StoreError::Validation("hostId changed".into()));
    }
    if !state.players.contains_key(&state.host_id) {
        return Err(StoreError::Validation("host not in players".into()));
    }
    if state.players.len() > state.settings.max_players {
        return Err(StoreError::Validation("too many players".into()));
    }
    match (&state.timer, state.phase) {
        (None, phase) if !phase.is_untimed() => {
            return Err(StoreError::Validation("timed phase without timer".into()))
        }
        (Some(_), Phase::Lobby) | (Some(_), Phase::Ended) => {
            return Err(StoreError::Validation("untimed phase with timer".into()))
        }
        (Some(timer), phase) if timer.phase != phase => {
            return Err(StoreError::Validation("timer phase mismatch".into()))
        }
        _ => {}
    }
    for action in state.night_actions.values() {
        if !state.players.contains_key(&action.player_id) {
            return Err(StoreError::Validation("night action from unknown player".into()));
        }
        if let Some(target) = &action.target_id {
            if !state.players.contains_key(target) {
                return Err(StoreError::Validation("night action at unknown target".into()));
            }
        }
    }
    for vote in state.votes.values() {
        if !state.players.contains_key(&vote.player_id) {
            return Err(StoreError::Validation("vote from unknown player".into()));
        }
        if let Some(target) = &vote.target_id {
            if !state.players.contains_key(target) {
                return Err(StoreError::Validation("vote at unknown target".into()));
            }
        }
    }
    Ok(())
}
