//! Per-mission event fan-out.
//!
//! Publishing is fire-and-forget: each subscriber owns a bounded buffer,
//! and a subscriber that cannot keep up loses the newest events (counted,
//! never blocking the publisher or the mission tick).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use chrono::{DateTime, Utc};
use survey_core::models::{MissionPhase, Position};

/// Default per-subscriber buffer depth.
const SUBSCRIBER_BUFFER: usize = 256;

/// Events published on a mission's topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEvent {
    Telemetry {
        mission_id: String,
        timestamp: DateTime<Utc>,
        position: Position,
        altitude_m: f64,
        heading_deg: f64,
        speed_mps: f64,
        battery_pct: f64,
        waypoint_index: usize,
        progress_pct: f64,
        phase: MissionPhase,
    },
    PhaseChange {
        mission_id: String,
        old_phase: MissionPhase,
        new_phase: MissionPhase,
        timestamp: DateTime<Utc>,
    },
    ReplacementDispatched {
        mission_id: String,
        outgoing_drone_id: String,
        outgoing_battery_pct: f64,
        incoming_drone_id: String,
        incoming_battery_pct: f64,
        waypoint_index: usize,
        base_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    HandoffComplete {
        mission_id: String,
        outgoing_drone_id: String,
        incoming_drone_id: String,
        waypoint_index: usize,
        timestamp: DateTime<Utc>,
    },
    MissionAborted {
        mission_id: String,
        drone_id: String,
        battery_pct: f64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    MissionComplete {
        mission_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl MissionEvent {
    pub fn mission_id(&self) -> &str {
        match self {
            MissionEvent::Telemetry { mission_id, .. }
            | MissionEvent::PhaseChange { mission_id, .. }
            | MissionEvent::ReplacementDispatched { mission_id, .. }
            | MissionEvent::HandoffComplete { mission_id, .. }
            | MissionEvent::MissionAborted { mission_id, .. }
            | MissionEvent::MissionComplete { mission_id, .. } => mission_id,
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<MissionEvent>,
    dropped: Arc<AtomicU64>,
}

/// A subscriber's end of a mission topic.
pub struct Subscription {
    pub rx: mpsc::Receiver<MissionEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Events lost to this subscriber because its buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fan-out hub for per-mission event topics.
#[derive(Default)]
pub struct TelemetryBus {
    topics: DashMap<String, Vec<Subscriber>>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, mission_id: &str) -> Subscription {
        self.subscribe_with_capacity(mission_id, SUBSCRIBER_BUFFER)
    }

    pub fn subscribe_with_capacity(&self, mission_id: &str, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        self.topics
            .entry(mission_id.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                dropped: dropped.clone(),
            });
        Subscription { rx, dropped }
    }

    /// Deliver an event to every live subscriber of its mission topic.
    /// Never blocks: full buffers drop the event for that subscriber.
    pub fn publish(&self, event: MissionEvent) {
        let Some(mut subscribers) = self.topics.get_mut(event.mission_id()) else {
            return;
        };

        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    tracing::warn!(
                        mission_id = event.mission_id(),
                        dropped,
                        "slow telemetry subscriber dropping events"
                    );
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drop a mission's topic and disconnect its subscribers.
    pub fn close_topic(&self, mission_id: &str) {
        self.topics.remove(mission_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_event(mission_id: &str, waypoint_index: usize) -> MissionEvent {
        MissionEvent::Telemetry {
            mission_id: mission_id.to_string(),
            timestamp: Utc::now(),
            position: Position::new(72.877, 19.076, 50.0),
            altitude_m: 50.0,
            heading_deg: 0.0,
            speed_mps: 10.0,
            battery_pct: 90.0,
            waypoint_index,
            progress_pct: 0.0,
            phase: MissionPhase::Surveying,
        }
    }

    #[tokio::test]
    async fn events_reach_all_subscribers_of_the_topic() {
        let bus = TelemetryBus::new();
        let mut a = bus.subscribe("MSN-0001");
        let mut b = bus.subscribe("MSN-0001");
        let mut other = bus.subscribe("MSN-0002");

        bus.publish(telemetry_event("MSN-0001", 1));

        assert!(matches!(
            a.rx.recv().await,
            Some(MissionEvent::Telemetry { waypoint_index: 1, .. })
        ));
        assert!(matches!(
            b.rx.recv().await,
            Some(MissionEvent::Telemetry { waypoint_index: 1, .. })
        ));
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_newest_with_counter() {
        let bus = TelemetryBus::new();
        let mut sub = bus.subscribe_with_capacity("MSN-0001", 2);

        for i in 0..5 {
            bus.publish(telemetry_event("MSN-0001", i));
        }

        // The first two made it; the newest three were dropped
        assert_eq!(sub.dropped_count(), 3);
        let first = sub.rx.recv().await.unwrap();
        let second = sub.rx.recv().await.unwrap();
        assert!(matches!(first, MissionEvent::Telemetry { waypoint_index: 0, .. }));
        assert!(matches!(second, MissionEvent::Telemetry { waypoint_index: 1, .. }));
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = TelemetryBus::new();
        let sub = bus.subscribe("MSN-0001");
        drop(sub);

        bus.publish(telemetry_event("MSN-0001", 0));
        assert!(bus
            .topics
            .get("MSN-0001")
            .map(|subs| subs.is_empty())
            .unwrap_or(true));
    }
}
