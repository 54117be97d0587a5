//! Change-feed engine: polls board snapshots per subscriber, diffs them
//! against the previous poll, and emits typed events over a channel. The
//! engine knows nothing about the transport; `sse.rs` turns frames into
//! wire bytes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::errors::BoardError;

use super::db::DbHandle;
use super::models::{ActivityEntry, BoardSnapshot, Mission, MissionState, StageId, WorkItem};

/// Buffered frames per subscriber before the engine blocks on send.
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Poll cadence for one feed subscription.
#[derive(Debug, Clone, Copy)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&ServerConfig> for FeedConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Events delivered to feed subscribers. Serialized adjacently tagged, so
/// `ItemAdded` becomes `{"type": "item-added", "data": {...}}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum FeedEvent {
    StreamConnected {
        project_id: i64,
    },
    ItemAdded(WorkItem),
    ItemMoved {
        item: WorkItem,
        from: StageId,
        to: StageId,
    },
    ItemUpdated(WorkItem),
    ItemDeleted {
        id: i64,
    },
    MissionCompleted(Mission),
    BoardUpdated {
        mission: Option<Mission>,
    },
    ActivityEntryAdded(ActivityEntry),
}

impl FeedEvent {
    /// Wire name of the event, matching the envelope's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::StreamConnected { .. } => "stream-connected",
            FeedEvent::ItemAdded(_) => "item-added",
            FeedEvent::ItemMoved { .. } => "item-moved",
            FeedEvent::ItemUpdated(_) => "item-updated",
            FeedEvent::ItemDeleted { .. } => "item-deleted",
            FeedEvent::MissionCompleted(_) => "mission-completed",
            FeedEvent::BoardUpdated { .. } => "board-updated",
            FeedEvent::ActivityEntryAdded(_) => "activity-entry-added",
        }
    }
}

/// What the engine pushes down the subscriber channel: either a payload
/// event or a keep-alive marker.
#[derive(Debug, Clone)]
pub enum FeedFrame {
    Event(FeedEvent),
    Heartbeat,
}

/// Where the engine gets its snapshots from. The database handle is the
/// production source; tests substitute scripted ones.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(
        &self,
        project_id: i64,
        activity_cursor: Option<String>,
    ) -> impl Future<Output = Result<BoardSnapshot, BoardError>> + Send;
}

impl SnapshotSource for DbHandle {
    fn snapshot(
        &self,
        project_id: i64,
        activity_cursor: Option<String>,
    ) -> impl Future<Output = Result<BoardSnapshot, BoardError>> + Send {
        let handle = self.clone();
        async move {
            handle
                .call(move |db| db.feed_snapshot(project_id, activity_cursor.as_deref()))
                .await
        }
    }
}

struct TrackedItem {
    stage: StageId,
    updated_at: String,
    digest: String,
}

/// Per-subscriber diff state. Holds stage, write timestamp, and content
/// digest per currently visible item plus the mission key and activity
/// cursor; memory stays proportional to board size no matter how long the
/// subscription lives.
#[derive(Default)]
pub struct FeedTracker {
    items: HashMap<i64, TrackedItem>,
    mission: Option<(i64, MissionState)>,
    activity_cursor: Option<String>,
    primed: bool,
}

impl FeedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activity_cursor(&self) -> Option<&str> {
        self.activity_cursor.as_deref()
    }

    /// Compare a fresh snapshot against the tracked state and return the
    /// events a subscriber should see, in delivery order: item changes in
    /// snapshot order, then deletions by ascending id, then mission events,
    /// then activity entries chronologically.
    ///
    /// The first snapshot only primes the state; a new subscriber starts
    /// from the present instead of replaying history.
    pub fn diff(&mut self, snapshot: &BoardSnapshot) -> Vec<FeedEvent> {
        let baseline = !self.primed;
        let mut events = Vec::new();

        let mut current_ids = HashSet::with_capacity(snapshot.items.len());
        for item in &snapshot.items {
            current_ids.insert(item.id);
            let digest = item.content_digest();
            match self.items.get(&item.id) {
                None => {
                    if !baseline {
                        events.push(FeedEvent::ItemAdded(item.clone()));
                    }
                }
                Some(prev) if prev.stage != item.stage => {
                    events.push(FeedEvent::ItemMoved {
                        item: item.clone(),
                        from: prev.stage,
                        to: item.stage,
                    });
                }
                Some(prev) if prev.digest != digest || prev.updated_at != item.updated_at => {
                    events.push(FeedEvent::ItemUpdated(item.clone()));
                }
                Some(_) => {}
            }
            self.items.insert(
                item.id,
                TrackedItem {
                    stage: item.stage,
                    updated_at: item.updated_at.clone(),
                    digest,
                },
            );
        }

        let mut removed: Vec<i64> = self
            .items
            .keys()
            .filter(|id| !current_ids.contains(id))
            .copied()
            .collect();
        removed.sort_unstable();
        for id in removed {
            self.items.remove(&id);
            if !baseline {
                events.push(FeedEvent::ItemDeleted { id });
            }
        }

        let mission_key = snapshot.mission.as_ref().map(|m| (m.id, m.state));
        if !baseline {
            if let Some(mission) = &snapshot.mission {
                let already_completed = self.mission == Some((mission.id, MissionState::Completed));
                if mission.state == MissionState::Completed && !already_completed {
                    events.push(FeedEvent::MissionCompleted(mission.clone()));
                }
            }
            if mission_key != self.mission {
                events.push(FeedEvent::BoardUpdated {
                    mission: snapshot.mission.clone(),
                });
            }
        }
        self.mission = mission_key;

        if baseline {
            self.activity_cursor = snapshot.latest_activity_ts.clone();
        } else {
            for entry in &snapshot.activity {
                events.push(FeedEvent::ActivityEntryAdded(entry.clone()));
            }
            if let Some(last) = snapshot.activity.last() {
                self.activity_cursor = Some(last.created_at.clone());
            }
        }

        self.primed = true;
        events
    }
}

/// Drive one subscription until the receiver goes away. Sends a
/// `stream-connected` hello, then loops over the poll and heartbeat timers.
/// A failed poll is logged and retried on the next tick; the tracker is
/// only advanced by successful snapshots, so no change is lost to a
/// transient storage error.
pub async fn run_feed<S: SnapshotSource>(
    source: S,
    project_id: i64,
    config: FeedConfig,
    tx: mpsc::Sender<FeedFrame>,
) {
    let mut tracker = FeedTracker::new();

    let hello = FeedEvent::StreamConnected { project_id };
    if tx.send(FeedFrame::Event(hello)).await.is_err() {
        return;
    }

    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Both intervals fire once immediately. The poll's first tick drives the
    // baseline snapshot; the heartbeat's is swallowed here.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let cursor = tracker.activity_cursor().map(String::from);
                match source.snapshot(project_id, cursor).await {
                    Ok(snapshot) => {
                        let events = tracker.diff(&snapshot);
                        if !events.is_empty() {
                            tracing::debug!(
                                "Feed poll for project {} produced {} events",
                                project_id,
                                events.len()
                            );
                        }
                        for event in events {
                            if tx.send(FeedFrame::Event(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Change feed poll failed for project {}: {}",
                            project_id,
                            e
                        );
                    }
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(FeedFrame::Heartbeat).await.is_err() {
                    return;
                }
            }
            _ = tx.closed() => {
                tracing::info!("Change feed for project {} closed by subscriber", project_id);
                return;
            }
        }
    }
}
