//! Session records binding a (player, room) pair to its current socket.
//! Duplicate logins evict the previous binding ("latest wins").

use super::{session_key, Kv};
use crate::error::StoreResult;
use crate::types::{new_id, now_ms, ActionId, PlayerId, RoomId, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Sessions outlive the 24-hour token by one hour.
pub const SESSION_TTL: Duration = Duration::from_secs(25 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub player_id: PlayerId,
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub socket_id: String,
    pub connected_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_acked_action_id: Option<ActionId>,
}

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn Kv>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Register a fresh session for a login, returning the new session and
    /// the evicted predecessor (if any) so its socket can be notified with
    /// reason `duplicate_session`.
    pub async fn register(
        &self,
        player_id: &str,
        room_id: &str,
        socket_id: &str,
    ) -> StoreResult<(Session, Option<Session>)> {
        let evicted = self.get(player_id, room_id).await?;
        let session = Session {
            player_id: player_id.to_string(),
            room_id: room_id.to_string(),
            session_id: new_id(),
            socket_id: socket_id.to_string(),
            connected_at: now_ms(),
            last_acked_action_id: None,
        };
        self.write(&session).await?;
        if let Some(old) = &evicted {
            tracing::info!(
                player = %player_id,
                room = %room_id,
                old_socket = %old.socket_id,
                "duplicate login, evicting previous session"
            );
        }
        Ok((session, evicted))
    }

    /// Rebind an existing session to a new socket on reconnection. Returns
    /// the updated session and the socket id the session was bound to
    /// before, so the old transport can be evicted.
    pub async fn resume(
        &self,
        player_id: &str,
        room_id: &str,
        session_id: &str,
        socket_id: &str,
    ) -> StoreResult<Option<(Session, Option<String>)>> {
        let Some(mut session) = self.get(player_id, room_id).await? else {
            return Ok(None);
        };
        if session.session_id != session_id {
            return Ok(None);
        }
        let prior_socket = (session.socket_id != socket_id).then(|| session.socket_id.clone());
        session.socket_id = socket_id.to_string();
        session.connected_at = now_ms();
        self.write(&session).await?;
        Ok(Some((session, prior_socket)))
    }

    pub async fn get(&self, player_id: &str, room_id: &str) -> StoreResult<Option<Session>> {
        match self.kv.get(&session_key(player_id, room_id)).await? {
            Some(v) => Ok(Some(serde_json::from_str(&v.value)?)),
            None => Ok(None),
        }
    }

    /// Record the last action id acknowledged to this session's client.
    pub async fn record_ack(
        &self,
        player_id: &str,
        room_id: &str,
        action_id: &str,
    ) -> StoreResult<()> {
        if let Some(mut session) = self.get(player_id, room_id).await? {
            session.last_acked_action_id = Some(action_id.to_string());
            self.write(&session).await?;
        }
        Ok(())
    }

    pub async fn evict(&self, player_id: &str, room_id: &str) -> StoreResult<bool> {
        self.kv.delete(&session_key(player_id, room_id)).await
    }

    async fn write(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_string(session)?;
        self.kv
            .put(
                &session_key(&session.player_id, &session.room_id),
                &json,
                Some(SESSION_TTL),
            )
            .await?;
        Ok(())
    }
}
