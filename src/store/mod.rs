//! Storage layer: a small key-value abstraction with the atomic primitives
//! the game core needs (set-if-absent, revision-checked writes, TTLs,
//! pub/sub), plus the domain stores built on top of it.
//!
//! The in-process [`MemoryKv`] backend ships by default; a shared backend
//! implementing [`Kv`] slots in behind the same trait with identical
//! behaviour except durability.

mod dedup;
mod leader;
mod memory;
mod rooms;
mod sessions;

pub use dedup::{DedupCache, DedupOutcome};
pub use leader::LeaderElector;
pub use memory::MemoryKv;
pub use rooms::{RoomStore, ROOM_TTL};
pub use sessions::{Session, SessionStore, SESSION_TTL};

use crate::error::StoreResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;

/// A stored value together with its monotonically increasing revision.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: String,
    pub revision: u64,
}

/// Minimal key-value interface. Every operation is individually atomic.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<VersionedValue>>;

    /// Unconditional write; returns the new revision.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<u64>;

    /// Write only when the key is absent. Returns whether the write landed.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> StoreResult<bool>;

    /// Write only when the stored revision matches `expected`; fails with
    /// [`StoreError::WriteLoss`](crate::error::StoreError::WriteLoss)
    /// otherwise. Returns the new revision.
    async fn put_if_revision(
        &self,
        key: &str,
        expected: u64,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<u64>;

    /// Write only when the stored value equals `expected` (leases). Returns
    /// whether the write landed.
    async fn put_if_value(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete only when the stored value equals `expected`.
    async fn delete_if_value(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Reset a key's TTL without touching its value.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Append to a capped list, evicting the oldest entries beyond `cap`.
    async fn push_capped(
        &self,
        key: &str,
        entry: &str,
        cap: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Read a capped list, oldest first.
    async fn list(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Fan a payload out to all current subscribers of `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// Subscribe to a channel. The receiver sees payloads published after
    /// this call, in publish order.
    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

pub(crate) fn room_key(room_id: &str) -> String {
    format!("room:{room_id}")
}

pub(crate) fn room_code_key(code: &str) -> String {
    format!("room_code:{code}")
}

pub(crate) fn snapshot_key(room_id: &str) -> String {
    format!("snapshot:room:{room_id}")
}

pub(crate) fn events_key(room_id: &str) -> String {
    format!("room:{room_id}:events")
}

pub(crate) fn session_key(player_id: &str, room_id: &str) -> String {
    format!("session:{player_id}:{room_id}")
}

pub(crate) fn leader_key(room_id: &str) -> String {
    format!("leader:{room_id}")
}

pub(crate) fn action_key(action_id: &str, player_id: &str, room_id: &str) -> String {
    format!("action:{action_id}:{player_id}:{room_id}")
}

/// Channel carrying committed room events for subscriber fan-out.
pub fn room_channel(room_id: &str) -> String {
    format!("room:{room_id}")
}
