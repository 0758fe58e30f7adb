//! Per-room phase coordinators. Each led room gets one task that sleeps
//! until the sooner of the phase deadline or a poke from the dispatcher,
//! then resolves the phase when its completion predicate holds or the hard
//! timer has expired.

use crate::engine;
use crate::error::GameError;
use crate::protocol::RoomEvent;
use crate::store::{room_channel, Kv, LeaderElector, RoomStore};
use crate::types::{now_ms, Phase, RoomId, RoomState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

struct Coordinator {
    poke: mpsc::Sender<()>,
    task: JoinHandle<()>,
    renewal: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Scheduler {
    rooms: RoomStore,
    kv: Arc<dyn Kv>,
    leader: LeaderElector,
    coordinators: Arc<RwLock<HashMap<RoomId, Coordinator>>>,
}

impl Scheduler {
    pub fn new(rooms: RoomStore, kv: Arc<dyn Kv>, leader: LeaderElector) -> Self {
        Self {
            rooms,
            kv,
            leader,
            coordinators: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Make sure a coordinator exists for a room this instance leads.
    pub async fn ensure_room(&self, room_id: &str) {
        {
            let coordinators = self.coordinators.read().await;
            if coordinators.contains_key(room_id) {
                return;
            }
        }
        match self.leader.try_acquire(room_id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                tracing::warn!(room = %room_id, error = %err, "lease acquisition failed");
                return;
            }
        }

        let (poke_tx, poke_rx) = mpsc::channel(8);
        let renewal = self.leader.spawn_renewal(room_id.to_string());
        let task = {
            let scheduler = self.clone();
            let room_id = room_id.to_string();
            tokio::spawn(async move {
                scheduler.run_coordinator(room_id.clone(), poke_rx).await;
                scheduler.coordinators.write().await.remove(&room_id);
            })
        };

        let mut coordinators = self.coordinators.write().await;
        coordinators.insert(
            room_id.to_string(),
            Coordinator {
                poke: poke_tx,
                task,
                renewal,
            },
        );
    }

    /// Wake a room's coordinator to re-evaluate its completion predicate.
    pub async fn poke(&self, room_id: &str) {
        let coordinators = self.coordinators.read().await;
        if let Some(coordinator) = coordinators.get(room_id) {
            let _ = coordinator.poke.try_send(());
        }
    }

    pub async fn cancel(&self, room_id: &str) {
        if let Some(coordinator) = self.coordinators.write().await.remove(room_id) {
            coordinator.task.abort();
            coordinator.renewal.abort();
        }
    }

    /// Graceful shutdown: stop every coordinator and renewal task.
    pub async fn shutdown(&self) {
        let mut coordinators = self.coordinators.write().await;
        for (_, coordinator) in coordinators.drain() {
            coordinator.task.abort();
            coordinator.renewal.abort();
        }
    }

    async fn run_coordinator(&self, room_id: RoomId, mut poke_rx: mpsc::Receiver<()>) {
        tracing::debug!(room = %room_id, "coordinator started");
        loop {
            match self.leader.is_leader(&room_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(room = %room_id, "no longer leader, stopping coordinator");
                    return;
                }
                Err(err) => {
                    tracing::warn!(room = %room_id, error = %err, "leadership check failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            let state = match self.rooms.get_room_state(&room_id).await {
                Ok(Some((state, _))) => state,
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(room = %room_id, error = %err, "state load failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            match state.phase {
                Phase::Ended => {
                    tracing::debug!(room = %room_id, "room ended, stopping coordinator");
                    return;
                }
                Phase::Lobby => {
                    // Nothing to time in the lobby; wait for a poke.
                    if poke_rx.recv().await.is_none() {
                        return;
                    }
                }
                _ => {
                    let Some(timer) = state.timer.clone() else {
                        // A timed phase without a timer violates an invariant
                        // the store enforces; resolve it rather than spin.
                        tracing::error!(room = %room_id, phase = ?state.phase, "timer missing");
                        if self.resolve(&room_id).await.is_err() {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        continue;
                    };

                    let now = now_ms();
                    if now >= timer.ends_at || phase_complete(&state) {
                        if let Err(err) = self.resolve(&room_id).await {
                            tracing::warn!(room = %room_id, error = %err, "resolution failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        continue;
                    }

                    let wait = Duration::from_millis((timer.ends_at - now).max(1) as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        poke = poke_rx.recv() => {
                            if poke.is_none() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run the phase resolution for a room and publish the resulting events.
    pub async fn resolve(&self, room_id: &str) -> Result<(), GameError> {
        let (events, _state) = self
            .rooms
            .update_room_state_safe(room_id, |state| Ok(resolve_in_place(state)))
            .await?;

        for event in events {
            match serde_json::to_string(&event) {
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
        Ok(())
    }
}

/// Resolve the current phase (if it has a resolution step) and advance,
/// returning the events to publish.
fn resolve_in_place(state: &mut RoomState) -> Vec<RoomEvent> {
    let now = now_ms();
    let mut events = Vec::new();

    match state.phase {
        Phase::Night => {
            engine::accrue_afk_strikes(state);
            let summary = engine::resolve_night(state);
            for result in &summary.investigations {
                events.push(RoomEvent::InvestigationReady {
                    investigator_id: result.investigator_id.clone(),
                    result: result.clone(),
                });
            }
            if let Some(victim) = &summary.death {
                events.push(RoomEvent::PlayerStatus {
                    player_id: victim.clone(),
                    connected: state
                        .players
                        .get(victim)
                        .map(|p| p.connected)
                        .unwrap_or(false),
                    alive: false,
                });
            }
            events.push(RoomEvent::NightResult {
                death: summary.death,
                narrative: summary.narrative,
            });
        }
        Phase::DayVoting => {
            engine::accrue_afk_strikes(state);
            let summary = engine::resolve_voting(state);
            if let Some(victim) = &summary.lynched {
                events.push(RoomEvent::PlayerStatus {
                    player_id: victim.clone(),
                    connected: state
                        .players
                        .get(victim)
                        .map(|p| p.connected)
                        .unwrap_or(false),
                    alive: false,
                });
            }
            events.push(RoomEvent::Lynch {
                target_id: summary.lynched,
                narrative: summary.narrative,
            });
        }
        Phase::DayAnnouncement | Phase::DayDiscussion => {}
        Phase::Lobby | Phase::Ended => return events,
    }

    let change = engine::advance_phase(state, now);
    events.push(RoomEvent::Phase {
        phase: change.phase,
        timer: change.timer,
    });
    events
}

fn phase_complete(state: &RoomState) -> bool {
    match state.phase {
        Phase::Night => engine::night_complete(state),
        Phase::DayVoting => engine::voting_complete(state),
        _ => false,
    }
}
