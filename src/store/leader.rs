//! Per-room leader leases: at most one instance commits writes for a room
//! at a time. Leases carry a short TTL so a killed instance loses its rooms
//! within seconds; renewal happens on a background task per room.

use super::{leader_key, Kv};
use crate::error::StoreResult;
use crate::types::RoomId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct LeaderElector {
    kv: Arc<dyn Kv>,
    instance_id: String,
    ttl: Duration,
    renew_every: Duration,
    held: Arc<RwLock<HashSet<RoomId>>>,
}

impl LeaderElector {
    pub fn new(kv: Arc<dyn Kv>, instance_id: String, ttl_ms: u64, renew_ms: u64) -> Self {
        Self {
            kv,
            instance_id,
            ttl: Duration::from_millis(ttl_ms),
            renew_every: Duration::from_millis(renew_ms),
            held: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to take (or re-take) the lease for a room. Returns whether this
    /// instance is the leader afterwards.
    pub async fn try_acquire(&self, room_id: &str) -> StoreResult<bool> {
        let key = leader_key(room_id);
        let acquired = self
            .kv
            .put_if_absent(&key, &self.instance_id, Some(self.ttl))
            .await?;

        let leading = if acquired {
            true
        } else {
            // Already held; it may be us from an earlier acquisition.
            self.kv
                .put_if_value(&key, &self.instance_id, &self.instance_id, Some(self.ttl))
                .await?
        };

        if leading {
            self.held.write().await.insert(room_id.to_string());
        }
        Ok(leading)
    }

    /// Renew the lease once. A failed renewal means leadership moved; the
    /// caller resigns silently.
    pub async fn renew(&self, room_id: &str) -> StoreResult<bool> {
        let renewed = self
            .kv
            .put_if_value(
                &leader_key(room_id),
                &self.instance_id,
                &self.instance_id,
                Some(self.ttl),
            )
            .await?;
        if !renewed {
            self.held.write().await.remove(room_id);
        }
        Ok(renewed)
    }

    /// Spawn the renewal loop for a held room. The task ends when renewal
    /// fails or the lease is released.
    pub fn spawn_renewal(&self, room_id: RoomId) -> JoinHandle<()> {
        let elector = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(elector.renew_every).await;
                if !elector.held.read().await.contains(&room_id) {
                    return;
                }
                match elector.renew(&room_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::info!(room = %room_id, "lost leader lease, resigning");
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(room = %room_id, error = %err, "lease renewal failed, resigning");
                        elector.held.write().await.remove(&room_id);
                        return;
                    }
                }
            }
        })
    }

    pub async fn is_leader(&self, room_id: &str) -> StoreResult<bool> {
        Ok(self
            .kv
            .get(&leader_key(room_id))
            .await?
            .map(|v| v.value == self.instance_id)
            .unwrap_or(false))
    }

    pub async fn release(&self, room_id: &str) -> StoreResult<()> {
        self.held.write().await.remove(room_id);
        self.kv
            .delete_if_value(&leader_key(room_id), &self.instance_id)
            .await?;
        Ok(())
    }

    /// Graceful shutdown: release every held lease.
    pub async fn release_all(&self) {
        let rooms: Vec<RoomId> = self.held.read().await.iter().cloned().collect();
        for room_id in rooms {
            if let Err(err) = self.release(&room_id).await {
                tracing::warn!(room = %room_id, error = %err, "failed to release lease");
            }
        }
    }
}
