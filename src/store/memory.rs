//! In-process key-value backend. Identical semantics to a shared backend
//! except durability; TTLs are enforced lazily on access.

use super::{Kv, VersionedValue};
use crate::error::{StoreError, StoreResult};
use crate::types::now_ms;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    revision: u64,
    expires_at: Option<i64>,
}

impl Entry {
    fn expired(&self, now: i64) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<i64>,
}

#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    lists: RwLock<HashMap<String, ListEntry>>,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

const CHANNEL_CAPACITY: usize = 256;

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| now_ms() + d.as_millis() as i64)
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> StoreResult<Option<VersionedValue>> {
        let now = now_ms();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.expired(now) => {
                    return Ok(Some(VersionedValue {
                        value: entry.value.clone(),
                        revision: entry.revision,
                    }))
                }
                Some(_) => {}
            }
        }
        // Purge the expired entry.
        let mut entries = self.entries.write().await;
        if entries.get(key).map(|e| e.expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<u64> {
        let mut entries = self.entries.write().await;
        let revision = entries
            .get(key)
            .filter(|e| !e.expired(now_ms()))
            .map(|e| e.revision + 1)
            .unwrap_or(1);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                revision,
                expires_at: expiry(ttl),
            },
        );
        Ok(revision)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(key) {
            if !existing.expired(now_ms()) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                revision: 1,
                expires_at: expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn put_if_revision(
        &self,
        key: &str,
        expected: u64,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<u64> {
        let mut entries = self.entries.write().await;
        let current = entries
            .get(key)
            .filter(|e| !e.expired(now_ms()))
            .map(|e| e.revision);
        if current != Some(expected) {
            return Err(StoreError::WriteLoss {
                key: key.to_string(),
            });
        }
        let revision = expected + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                revision,
                expires_at: expiry(ttl),
            },
        );
        Ok(revision)
    }

    async fn put_if_value(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(existing) if !existing.expired(now_ms()) && existing.value == expected => {
                let revision = existing.revision + 1;
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        revision,
                        expires_at: expiry(ttl),
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let existed = self.entries.write().await.remove(key).is_some();
        Ok(existed)
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(existing) if !existing.expired(now_ms()) && existing.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.expired(now_ms()) => {
                entry.expires_at = expiry(Some(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn push_capped(
        &self,
        key: &str,
        entry: &str,
        cap: usize,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut lists = self.lists.write().await;
        let list = lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: None,
        });
        list.items.push_back(entry.to_string());
        while list.items.len() > cap {
            list.items.pop_front();
        }
        list.expires_at = expiry(ttl).or(list.expires_at);
        Ok(())
    }

    async fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        let lists = self.lists.read().await;
        Ok(lists
            .get(key)
            .filter(|l| l.expires_at.map(|at| at > now_ms()).unwrap_or(true))
            .map(|l| l.items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(channel) {
            // No receivers is fine.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
