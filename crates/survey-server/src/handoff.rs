//! Mid-mission drone handoff coordination.
//!
//! When the flying drone's battery goes critical, a replacement is
//! dispatched from a base toward the outgoing drone's position. Ownership
//! swaps when the two close within the rendezvous radius; the outgoing
//! drone flies home to charge. With no dispatchable replacement the
//! mission aborts and the drone still returns home.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use survey_core::models::{
    Drone, DroneStatus, HandoffKind, HandoffLog, Mission, MissionStatus, Position,
};
use survey_core::{Result, SurveyError};

use crate::bus::{MissionEvent, TelemetryBus};
use crate::config::Config;
use crate::loops::{replacement_flight, return_flight};
use crate::repository::Repository;

/// Coordinates replacement dispatch, rendezvous completion, and
/// return-to-base for one process.
///
/// `complete` may be invoked by both rendezvous detectors (the mission
/// executor and the replacement flight); an internal gate plus the
/// `pending_replacement_drone_id` check make the second call a no-op.
#[derive(Clone)]
pub struct HandoffCoordinator {
    repo: Arc<dyn Repository>,
    bus: Arc<TelemetryBus>,
    config: Config,
    shutdown: broadcast::Sender<()>,
    complete_gate: Arc<Mutex<()>>,
}

impl HandoffCoordinator {
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: Arc<TelemetryBus>,
        config: Config,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            repo,
            bus,
            config,
            shutdown,
            complete_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Dispatch a replacement for the mission's current drone.
    ///
    /// No-op when a replacement is already pending (this is the hysteresis
    /// that stops a critical battery from re-triggering every tick) or the
    /// mission is no longer active. Escalates to an abort when no candidate
    /// carries enough battery.
    pub async fn trigger_replacement(&self, mission_id: &str) -> Result<()> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if mission.pending_replacement_drone_id.is_some() || !mission.status.is_active() {
            return Ok(());
        }

        let outgoing_id = mission.assigned_drone_id.clone().ok_or_else(|| {
            SurveyError::IllegalState(format!("mission '{mission_id}' has no assigned drone"))
        })?;
        let outgoing = self.repo.get_drone(&outgoing_id).await?;

        let Some(mut replacement) = self.select_replacement(&mission, &outgoing_id).await? else {
            return self.abort_no_replacement(&mut mission, outgoing).await;
        };

        let reason = format!("Low battery ({:.1}%)", outgoing.battery_level);
        info!(
            mission_id,
            outgoing = %outgoing.drone_id,
            incoming = %replacement.drone_id,
            %reason,
            "dispatching replacement drone"
        );

        replacement.status = DroneStatus::Dispatching;
        replacement.updated_at = Utc::now();
        self.repo.save_drone(&replacement).await?;

        mission.pending_replacement_drone_id = Some(replacement.drone_id.clone());
        mission.handoff_location = Some(outgoing.location);
        self.repo.save_mission(&mission).await?;

        let mut log = HandoffLog::new(&mission, HandoffKind::ReplacementDispatched, reason.clone())
            .with_outgoing(&outgoing)
            .with_incoming(&replacement);
        if let Some(base_id) = &replacement.base_id {
            log = log.with_base(base_id.clone());
        }
        self.repo.append_handoff_log(&log).await?;

        self.bus.publish(MissionEvent::ReplacementDispatched {
            mission_id: mission.mission_id.clone(),
            outgoing_drone_id: outgoing.drone_id.clone(),
            outgoing_battery_pct: outgoing.battery_level,
            incoming_drone_id: replacement.drone_id.clone(),
            incoming_battery_pct: replacement.battery_level,
            waypoint_index: mission.current_waypoint_index,
            base_id: replacement.base_id.clone(),
            timestamp: Utc::now(),
        });

        let target = mission
            .handoff_location
            .unwrap_or(outgoing.location);
        tokio::spawn(replacement_flight::run_replacement_flight(
            self.repo.clone(),
            self.config.clone(),
            self.clone(),
            mission.mission_id.clone(),
            replacement.drone_id.clone(),
            target,
            mission.altitude_m,
            self.shutdown.clone(),
        ));

        Ok(())
    }

    /// Finish the handoff: swap ownership to the pending replacement and
    /// send the outgoing drone home.
    ///
    /// Idempotent; returns the incoming drone when a swap happened and
    /// `None` when there was nothing pending (already completed, or the
    /// replacement was cancelled).
    pub async fn complete(&self, mission_id: &str) -> Result<Option<Drone>> {
        let _gate = self.complete_gate.lock().await;

        let mut mission = self.repo.get_mission(mission_id).await?;
        let Some(replacement_id) = mission.pending_replacement_drone_id.clone() else {
            return Ok(None);
        };
        let mut incoming = self.repo.get_drone(&replacement_id).await?;

        if let Some(outgoing_id) = mission.assigned_drone_id.clone() {
            let mut outgoing = self.repo.get_drone(&outgoing_id).await?;

            let log = HandoffLog::new(&mission, HandoffKind::HandoffComplete, "Rendezvous reached")
                .with_outgoing(&outgoing)
                .with_incoming(&incoming);
            self.repo.append_handoff_log(&log).await?;

            outgoing.status = DroneStatus::Returning;
            outgoing.current_mission_id = None;
            outgoing.returning_mission_id = Some(mission.mission_id.clone());
            outgoing.updated_at = Utc::now();
            self.repo.save_drone(&outgoing).await?;

            let from = mission.handoff_location.unwrap_or(outgoing.location);
            self.spawn_return_flight(&mission.mission_id, &outgoing, from);
        }

        incoming.status = DroneStatus::InFlight;
        incoming.current_mission_id = Some(mission.mission_id.clone());
        incoming.updated_at = Utc::now();
        self.repo.save_drone(&incoming).await?;

        let outgoing_id = mission.assigned_drone_id.clone().unwrap_or_default();
        mission.assigned_drone_id = Some(replacement_id.clone());
        mission.pending_replacement_drone_id = None;
        mission.handoff_location = None;
        self.repo.save_mission(&mission).await?;

        info!(
            mission_id,
            outgoing = %outgoing_id,
            incoming = %replacement_id,
            "handoff complete"
        );

        self.bus.publish(MissionEvent::HandoffComplete {
            mission_id: mission.mission_id.clone(),
            outgoing_drone_id: outgoing_id,
            incoming_drone_id: replacement_id,
            waypoint_index: mission.current_waypoint_index,
            timestamp: Utc::now(),
        });

        Ok(Some(incoming))
    }

    /// Abort the mission because no replacement can be dispatched; the
    /// outgoing drone still returns to base.
    pub async fn abort_no_replacement(
        &self,
        mission: &mut Mission,
        mut outgoing: Drone,
    ) -> Result<()> {
        let reason = format!("No replacement available (battery {:.1}%)", outgoing.battery_level);
        warn!(mission_id = %mission.mission_id, %reason, "aborting mission");

        mission.status = MissionStatus::Aborted;
        mission.abort_reason = Some(reason.clone());
        mission.completed_at = Some(Utc::now());
        self.repo.save_mission(mission).await?;

        outgoing.status = DroneStatus::Returning;
        outgoing.current_mission_id = None;
        outgoing.returning_mission_id = Some(mission.mission_id.clone());
        outgoing.updated_at = Utc::now();
        self.repo.save_drone(&outgoing).await?;

        let log = HandoffLog::new(mission, HandoffKind::MissionAborted, reason.clone())
            .with_outgoing(&outgoing);
        self.repo.append_handoff_log(&log).await?;

        self.bus.publish(MissionEvent::MissionAborted {
            mission_id: mission.mission_id.clone(),
            drone_id: outgoing.drone_id.clone(),
            battery_pct: outgoing.battery_level,
            reason,
            timestamp: Utc::now(),
        });

        let from = outgoing.location;
        self.spawn_return_flight(&mission.mission_id, &outgoing, from);
        Ok(())
    }

    fn spawn_return_flight(&self, mission_id: &str, drone: &Drone, from: Position) {
        tokio::spawn(return_flight::run_return_flight(
            self.repo.clone(),
            self.config.clone(),
            mission_id.to_string(),
            drone.drone_id.clone(),
            from,
            self.shutdown.clone(),
        ));
    }

    /// Candidate pool: available drones at the origin base first, then the
    /// whole fleet, battery descending, outgoing excluded. First candidate
    /// meeting the mission battery floor wins.
    async fn select_replacement(
        &self,
        mission: &Mission,
        exclude_drone_id: &str,
    ) -> Result<Option<Drone>> {
        let floor = self.config.min_battery_for_mission_pct;

        if let Some(base_id) = &mission.origin_base_id {
            let at_base = self.repo.available_drones(Some(base_id), None).await?;
            if let Some(drone) = at_base
                .into_iter()
                .find(|d| d.drone_id != exclude_drone_id && d.battery_level >= floor)
            {
                return Ok(Some(drone));
            }
        }

        let fleet_wide = self.repo.available_drones(None, None).await?;
        Ok(fleet_wide
            .into_iter()
            .find(|d| d.drone_id != exclude_drone_id && d.battery_level >= floor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::repository::MemoryRepository;

    fn drone(id: &str, battery: f64, status: DroneStatus) -> Drone {
        Drone {
            drone_id: id.to_string(),
            name: id.to_string(),
            model: "quad".to_string(),
            status,
            battery_level: battery,
            location: Position::new(72.88, 19.08, 50.0),
            home_base: Position::new(72.877, 19.076, 0.0),
            base_id: Some("BASE-001".to_string()),
            current_mission_id: None,
            returning_mission_id: None,
            updated_at: Utc::now(),
        }
    }

    async fn coordinator_with_mission(
        outgoing_battery: f64,
        candidate_battery: f64,
    ) -> (Arc<MemoryRepository>, HandoffCoordinator) {
        let repo = Arc::new(MemoryRepository::new());

        let mut outgoing = drone("DRN-0001", outgoing_battery, DroneStatus::InFlight);
        outgoing.current_mission_id = Some("MSN-0001".to_string());
        repo.save_drone(&outgoing).await.unwrap();
        repo.save_drone(&drone("DRN-0002", candidate_battery, DroneStatus::Available))
            .await
            .unwrap();

        let mut mission = Mission::new("MSN-0001", "handoff test");
        mission.status = MissionStatus::InProgress;
        mission.assigned_drone_id = Some("DRN-0001".to_string());
        mission.origin_base_id = Some("BASE-001".to_string());
        repo.save_mission(&mission).await.unwrap();

        let (shutdown, _) = tokio::sync::broadcast::channel(1);
        let coordinator = HandoffCoordinator::new(
            repo.clone(),
            Arc::new(TelemetryBus::new()),
            Config::default(),
            shutdown,
        );
        (repo, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn candidate_below_battery_floor_aborts_the_mission() {
        let (repo, coordinator) = coordinator_with_mission(18.0, 29.9).await;

        coordinator.trigger_replacement("MSN-0001").await.unwrap();

        let mission = repo.get_mission("MSN-0001").await.unwrap();
        assert_eq!(mission.status, MissionStatus::Aborted);
        assert!(mission
            .abort_reason
            .as_deref()
            .unwrap_or_default()
            .contains("No replacement available"));

        let outgoing = repo.get_drone("DRN-0001").await.unwrap();
        assert_eq!(outgoing.status, DroneStatus::Returning);
        assert!(outgoing.current_mission_id.is_none());

        // The weak candidate was never touched
        let candidate = repo.get_drone("DRN-0002").await.unwrap();
        assert_eq!(candidate.status, DroneStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn candidate_at_battery_floor_is_dispatched() {
        let (repo, coordinator) = coordinator_with_mission(18.0, 30.0).await;

        coordinator.trigger_replacement("MSN-0001").await.unwrap();
        // A second trigger in the same window is a no-op
        coordinator.trigger_replacement("MSN-0001").await.unwrap();

        let mission = repo.get_mission("MSN-0001").await.unwrap();
        assert_eq!(
            mission.pending_replacement_drone_id.as_deref(),
            Some("DRN-0002")
        );
        // Rendezvous is the outgoing drone's position at dispatch time
        assert_eq!(mission.handoff_location, Some(Position::new(72.88, 19.08, 50.0)));

        let candidate = repo.get_drone("DRN-0002").await.unwrap();
        assert_eq!(candidate.status, DroneStatus::Dispatching);

        let dispatched: Vec<_> = repo
            .handoff_history("MSN-0001")
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.kind == HandoffKind::ReplacementDispatched)
            .collect();
        assert_eq!(dispatched.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_swaps_ownership_exactly_once() {
        let (repo, coordinator) = coordinator_with_mission(18.0, 95.0).await;
        coordinator.trigger_replacement("MSN-0001").await.unwrap();

        let first = coordinator.complete("MSN-0001").await.unwrap();
        assert_eq!(first.unwrap().drone_id, "DRN-0002");

        let mission = repo.get_mission("MSN-0001").await.unwrap();
        assert_eq!(mission.assigned_drone_id.as_deref(), Some("DRN-0002"));
        assert!(mission.pending_replacement_drone_id.is_none());
        assert!(mission.handoff_location.is_none());

        // Exactly one drone owns the mission after the swap
        let outgoing = repo.get_drone("DRN-0001").await.unwrap();
        let incoming = repo.get_drone("DRN-0002").await.unwrap();
        assert_eq!(outgoing.status, DroneStatus::Returning);
        assert!(outgoing.current_mission_id.is_none());
        // The return leg keeps its provenance for restart recovery
        assert_eq!(outgoing.returning_mission_id.as_deref(), Some("MSN-0001"));
        assert_eq!(incoming.status, DroneStatus::InFlight);
        assert_eq!(incoming.current_mission_id.as_deref(), Some("MSN-0001"));

        // Second detector firing later is a no-op
        let second = coordinator.complete("MSN-0001").await.unwrap();
        assert!(second.is_none());

        let completions: Vec<_> = repo
            .handoff_history("MSN-0001")
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.kind == HandoffKind::HandoffComplete)
            .collect();
        assert_eq!(completions.len(), 1);
    }
}
