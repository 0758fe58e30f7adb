//! Idempotency records for action and vote submissions. Transports may
//! redeliver on reconnection; the cache collapses at-least-once retries
//! into at-most-once effects.

use super::{action_key, Kv};
use crate::error::StoreResult;
use crate::types::now_ms;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const PROCESSING_TTL: Duration = Duration::from_secs(10 * 60);
const COMPLETED_TTL: Duration = Duration::from_secs(60 * 60);
const FAILED_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DedupRecord {
    Processing { at: i64 },
    Completed { response: serde_json::Value },
    Failed { at: i64, code: String },
}

/// What the dispatcher should do with an incoming command.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// First sighting; the caller must later mark completed or failed.
    Fresh,
    /// An earlier delivery is still executing; drop silently.
    InFlight,
    /// Already done; re-emit the stored response to this caller.
    Completed(serde_json::Value),
    /// A recent attempt failed; the stored code is re-emitted until the
    /// failure record expires, after which a retry proceeds.
    RecentlyFailed(String),
}

#[derive(Clone)]
pub struct DedupCache {
    kv: Arc<dyn Kv>,
}

impl DedupCache {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub async fn begin(
        &self,
        action_id: &str,
        player_id: &str,
        room_id: &str,
    ) -> StoreResult<DedupOutcome> {
        let key = action_key(action_id, player_id, room_id);
        let record = DedupRecord::Processing { at: now_ms() };
        let json = serde_json::to_string(&record)?;

        if self.kv.put_if_absent(&key, &json, Some(PROCESSING_TTL)).await? {
            return Ok(DedupOutcome::Fresh);
        }

        match self.kv.get(&key).await? {
            Some(existing) => match serde_json::from_str::<DedupRecord>(&existing.value)? {
                DedupRecord::Processing { .. } => Ok(DedupOutcome::InFlight),
                DedupRecord::Completed { response } => Ok(DedupOutcome::Completed(response)),
                DedupRecord::Failed { code, .. } => Ok(DedupOutcome::RecentlyFailed(code)),
            },
            // Raced with expiry; try once more as a fresh record.
            None => {
                self.kv.put(&key, &json, Some(PROCESSING_TTL)).await?;
                Ok(DedupOutcome::Fresh)
            }
        }
    }

    /// Stored response for an already-completed action, if any. Read-only:
    /// never creates a record, so it is safe on the reconnect path.
    pub async fn completed_response(
        &self,
        action_id: &str,
        player_id: &str,
        room_id: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        let key = action_key(action_id, player_id, room_id);
        match self.kv.get(&key).await? {
            Some(existing) => match serde_json::from_str::<DedupRecord>(&existing.value)? {
                DedupRecord::Completed { response } => Ok(Some(response)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub async fn complete(
        &self,
        action_id: &str,
        player_id: &str,
        room_id: &str,
        response: serde_json::Value,
    ) -> StoreResult<()> {
        let record = DedupRecord::Completed { response };
        let json = serde_json::to_string(&record)?;
        self.kv
            .put(&action_key(action_id, player_id, room_id), &json, Some(COMPLETED_TTL))
            .await?;
        Ok(())
    }

    pub async fn fail(
        &self,
        action_id: &str,
        player_id: &str,
        room_id: &str,
        code: &str,
    ) -> StoreResult<()> {
        let record = DedupRecord::Failed {
            at: now_ms(),
            code: code.to_string(),
        };
        let json = serde_json::to_string(&record)?;
        self.kv
            .put(&action_key(action_id, player_id, room_id), &json, Some(FAILED_TTL))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    fn cache() -> DedupCache {
        DedupCache::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_first_sighting_is_fresh() {
        let dedup = cache();
        assert_eq!(
            dedup.begin("a1", "p1", "r1").await.unwrap(),
            DedupOutcome::Fresh
        );
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_dropped() {
        let dedup = cache();
        dedup.begin("a1", "p1", "r1").await.unwrap();
        assert_eq!(
            dedup.begin("a1", "p1", "r1").await.unwrap(),
            DedupOutcome::InFlight
        );
    }

    #[tokio::test]
    async fn test_completed_replays_response() {
        let dedup = cache();
        dedup.begin("a1", "p1", "r1").await.unwrap();
        let ack = serde_json::json!({"event": "action.ack", "actionId": "a1"});
        dedup.complete("a1", "p1", "r1", ack.clone()).await.unwrap();

        assert_eq!(
            dedup.begin("a1", "p1", "r1").await.unwrap(),
            DedupOutcome::Completed(ack)
        );
    }

    #[tokio::test]
    async fn test_failed_reported_until_expiry() {
        let dedup = cache();
        dedup.begin("a1", "p1", "r1").await.unwrap();
        dedup.fail("a1", "p1", "r1", "INVALID_TARGET").await.unwrap();

        assert_eq!(
            dedup.begin("a1", "p1", "r1").await.unwrap(),
            DedupOutcome::RecentlyFailed("INVALID_TARGET".to_string())
        );
    }

    #[tokio::test]
    async fn test_completed_response_lookup() {
        let dedup = cache();
        // Nothing recorded, and the lookup must not create a record.
        assert!(dedup
            .completed_response("a1", "p1", "r1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            dedup.begin("a1", "p1", "r1").await.unwrap(),
            DedupOutcome::Fresh
        );

        // Processing records carry no response.
        assert!(dedup
            .completed_response("a1", "p1", "r1")
            .await
            .unwrap()
            .is_none());

        let ack = serde_json::json!({"event": "action.ack", "actionId": "a1"});
        dedup.complete("a1", "p1", "r1", ack.clone()).await.unwrap();
        assert_eq!(
            dedup.completed_response("a1", "p1", "r1").await.unwrap(),
            Some(ack)
        );
    }

    #[tokio::test]
    async fn test_scoping_by_player_and_room() {
        let dedup = cache();
        dedup.begin("a1", "p1", "r1").await.unwrap();
        // Same action id from another player or room is independent.
        assert_eq!(
            dedup.begin("a1", "p2", "r1").await.unwrap(),
            DedupOutcome::Fresh
        );
        assert_eq!(
            dedup.begin("a1", "p1", "r2").await.unwrap(),
            DedupOutcome::Fresh
        );
    }
}
