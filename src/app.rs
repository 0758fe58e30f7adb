//! Process-wide shared state: configuration, stores, token service,
//! scheduler handles, and the local socket registry.

use crate::config::ServerConfig;
use crate::error::GameError;
use crate::protocol::{RoomEvent, ServerMessage};
use crate::scheduler::Scheduler;
use crate::store::{
    room_channel, DedupCache, Kv, LeaderElector, MemoryKv, RoomStore, SessionStore,
};
use crate::token::TokenService;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub kv: Arc<dyn Kv>,
    pub rooms: RoomStore,
    pub sessions: SessionStore,
    pub dedup: DedupCache,
    pub leader: LeaderElector,
    pub tokens: TokenService,
    pub scheduler: Scheduler,
    /// Direct outbound channels for sockets connected to this instance.
    sockets: RwLock<HashMap<String, mpsc::UnboundedSender<ServerMessage>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_kv(config, Arc::new(MemoryKv::new()))
    }

    /// Build on an explicit backend; tests and multi-instance setups share
    /// one `Kv` across several `AppState`s.
    pub fn with_kv(config: ServerConfig, kv: Arc<dyn Kv>) -> Self {
        let rooms = RoomStore::new(kv.clone());
        let leader = LeaderElector::new(
            kv.clone(),
            config.instance_id.clone(),
            config.lease_ttl_ms,
            config.lease_renew_ms,
        );
        let scheduler = Scheduler::new(rooms.clone(), kv.clone(), leader.clone());
        Self {
            tokens: TokenService::new(config.token_secret),
            sessions: SessionStore::new(kv.clone()),
            dedup: DedupCache::new(kv.clone()),
            rooms,
            leader,
            scheduler,
            kv,
            config,
            sockets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a socket's direct outbound channel.
    pub async fn register_socket(&self, socket_id: &str, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.sockets.write().await.insert(socket_id.to_string(), tx);
    }

    pub async fn unregister_socket(&self, socket_id: &str) {
        self.sockets.write().await.remove(socket_id);
    }

    /// Deliver directly to a socket on this instance. Returns whether the
    /// socket was known here; eviction also travels the pub/sub path for
    /// sockets on other instances.
    pub async fn send_to_socket(&self, socket_id: &str, msg: ServerMessage) -> bool {
        match self.sockets.read().await.get(socket_id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Publish a room event on the store's pub/sub channel.
    pub async fn publish_event(&self, room_id: &str, event: &RoomEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                if let Err(err) = self.kv.publish(&room_channel(room_id), &payload).await {
                    tracing::warn!(room = %room_id, error = %err, "event publish failed");
                }
            }
            Err(err) => {
                tracing::error!(room = %room_id, error = %err, "event serialization failed");
            }
        }
    }

    /// Take (or confirm) room leadership before a commit. Non-leaders
    /// reject with a transient error the client retries.
    pub async fn ensure_leader(&self, room_id: &str) -> Result<(), GameError> {
        let leading = self
            .leader
            .try_acquire(room_id)
            .await
            .map_err(GameError::from)?;
        if !leading {
            return Err(GameError::Internal("not leader for this room".into()));
        }
        Ok(())
    }
}
