//! In-memory repository backed by DashMap, for tests and demo scenarios.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

use survey_core::models::{
    Base, BaseStatus, Drone, DroneStatus, HandoffLog, Mission, MissionPhase, TelemetryPoint,
};
use survey_core::{Result, SurveyError};

use super::{MissionFilter, Repository};

/// Thread-safe in-memory store with the same semantics as the durable
/// repository: atomic per-entity writes, append-only log collections.
#[derive(Default)]
pub struct MemoryRepository {
    missions: DashMap<String, Mission>,
    drones: DashMap<String, Drone>,
    bases: DashMap<String, Base>,
    telemetry: Mutex<Vec<TelemetryPoint>>,
    handoff_logs: Mutex<Vec<HandoffLog>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_mission(&self, mission_id: &str) -> Result<Mission> {
        self.missions
            .get(mission_id)
            .map(|m| m.value().clone())
            .ok_or_else(|| SurveyError::NotFound(format!("mission '{mission_id}'")))
    }

    async fn save_mission(&self, mission: &Mission) -> Result<()> {
        self.missions
            .insert(mission.mission_id.clone(), mission.clone());
        Ok(())
    }

    async fn update_mission_progress(
        &self,
        mission_id: &str,
        progress_pct: f64,
        waypoint_index: usize,
        phase: MissionPhase,
    ) -> Result<()> {
        let mut mission = self
            .missions
            .get_mut(mission_id)
            .ok_or_else(|| SurveyError::NotFound(format!("mission '{mission_id}'")))?;
        mission.progress_pct = progress_pct;
        mission.current_waypoint_index = waypoint_index;
        mission.phase = phase;
        Ok(())
    }

    async fn delete_mission(&self, mission_id: &str) -> Result<()> {
        self.missions
            .remove(mission_id)
            .map(|_| ())
            .ok_or_else(|| SurveyError::NotFound(format!("mission '{mission_id}'")))
    }

    async fn query_missions(&self, filter: &MissionFilter) -> Result<Vec<Mission>> {
        let mut missions: Vec<Mission> = self
            .missions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        missions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(missions)
    }

    async fn get_drone(&self, drone_id: &str) -> Result<Drone> {
        self.drones
            .get(drone_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| SurveyError::NotFound(format!("drone '{drone_id}'")))
    }

    async fn save_drone(&self, drone: &Drone) -> Result<()> {
        self.drones.insert(drone.drone_id.clone(), drone.clone());
        Ok(())
    }

    async fn list_drones(&self) -> Result<Vec<Drone>> {
        let mut drones: Vec<Drone> = self.drones.iter().map(|d| d.value().clone()).collect();
        drones.sort_by(|a, b| a.drone_id.cmp(&b.drone_id));
        Ok(drones)
    }

    async fn available_drones(
        &self,
        base_id: Option<&str>,
        min_battery_pct: Option<f64>,
    ) -> Result<Vec<Drone>> {
        let mut drones: Vec<Drone> = self
            .drones
            .iter()
            .filter(|d| d.status == DroneStatus::Available)
            .filter(|d| base_id.is_none() || d.base_id.as_deref() == base_id)
            .filter(|d| min_battery_pct.map_or(true, |min| d.battery_level >= min))
            .map(|d| d.value().clone())
            .collect();
        drones.sort_by(|a, b| b.battery_level.total_cmp(&a.battery_level));
        Ok(drones)
    }

    async fn get_base(&self, base_id: &str) -> Result<Base> {
        self.bases
            .get(base_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| SurveyError::NotFound(format!("base '{base_id}'")))
    }

    async fn save_base(&self, base: &Base) -> Result<()> {
        self.bases.insert(base.base_id.clone(), base.clone());
        Ok(())
    }

    async fn active_bases(&self) -> Result<Vec<Base>> {
        Ok(self
            .bases
            .iter()
            .filter(|b| b.status == BaseStatus::Active)
            .map(|b| b.value().clone())
            .collect())
    }

    async fn append_telemetry(&self, point: &TelemetryPoint) -> Result<()> {
        self.telemetry
            .lock()
            .expect("telemetry lock poisoned")
            .push(point.clone());
        Ok(())
    }

    async fn recent_telemetry(
        &self,
        mission_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>> {
        let telemetry = self.telemetry.lock().expect("telemetry lock poisoned");
        Ok(telemetry
            .iter()
            .rev()
            .filter(|p| p.mission_id == mission_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_handoff_log(&self, entry: &HandoffLog) -> Result<()> {
        self.handoff_logs
            .lock()
            .expect("handoff log lock poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn handoff_history(&self, mission_id: &str) -> Result<Vec<HandoffLog>> {
        let logs = self.handoff_logs.lock().expect("handoff log lock poisoned");
        let mut history: Vec<HandoffLog> = logs
            .iter()
            .filter(|l| l.mission_id == mission_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(history)
    }

    async fn drone_activity(&self, drone_id: &str, limit: usize) -> Result<Vec<HandoffLog>> {
        let logs = self.handoff_logs.lock().expect("handoff log lock poisoned");
        Ok(logs
            .iter()
            .rev()
            .filter(|l| {
                l.outgoing_drone_id.as_deref() == Some(drone_id)
                    || l.incoming_drone_id.as_deref() == Some(drone_id)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use survey_core::models::Position;

    fn drone(id: &str, base: &str, battery: f64, status: DroneStatus) -> Drone {
        Drone {
            drone_id: id.to_string(),
            name: id.to_string(),
            model: "quad".to_string(),
            status,
            battery_level: battery,
            location: Position::new(72.877, 19.076, 0.0),
            home_base: Position::new(72.877, 19.076, 0.0),
            base_id: Some(base.to_string()),
            current_mission_id: None,
            returning_mission_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.get_mission("MSN-9999").await,
            Err(SurveyError::NotFound(_))
        ));
        assert!(matches!(
            repo.get_drone("DRN-9999").await,
            Err(SurveyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn available_drones_sorted_by_battery_desc() {
        let repo = MemoryRepository::new();
        repo.save_drone(&drone("DRN-0001", "BASE-001", 40.0, DroneStatus::Available))
            .await
            .unwrap();
        repo.save_drone(&drone("DRN-0002", "BASE-001", 90.0, DroneStatus::Available))
            .await
            .unwrap();
        repo.save_drone(&drone("DRN-0003", "BASE-001", 95.0, DroneStatus::Charging))
            .await
            .unwrap();
        repo.save_drone(&drone("DRN-0004", "BASE-002", 80.0, DroneStatus::Available))
            .await
            .unwrap();

        let at_base = repo
            .available_drones(Some("BASE-001"), None)
            .await
            .unwrap();
        assert_eq!(
            at_base.iter().map(|d| d.drone_id.as_str()).collect::<Vec<_>>(),
            vec!["DRN-0002", "DRN-0001"]
        );

        let with_floor = repo.available_drones(None, Some(50.0)).await.unwrap();
        assert_eq!(
            with_floor
                .iter()
                .map(|d| d.drone_id.as_str())
                .collect::<Vec<_>>(),
            vec!["DRN-0002", "DRN-0004"]
        );
    }

    #[tokio::test]
    async fn nearest_active_base_skips_inactive() {
        let repo = MemoryRepository::new();
        let mut near = Base {
            base_id: "BASE-001".to_string(),
            name: "near".to_string(),
            location: Position::new(72.877, 19.076, 0.0),
            status: BaseStatus::Maintenance,
            max_drones: 10,
            operational_radius_km: 15.0,
        };
        let far = Base {
            base_id: "BASE-002".to_string(),
            name: "far".to_string(),
            location: Position::new(73.0, 19.2, 0.0),
            status: BaseStatus::Active,
            ..near.clone()
        };
        repo.save_base(&near).await.unwrap();
        repo.save_base(&far).await.unwrap();

        let nearest = repo.nearest_active_base(19.076, 72.877).await.unwrap();
        assert_eq!(nearest.unwrap().base_id, "BASE-002");

        near.status = BaseStatus::Active;
        repo.save_base(&near).await.unwrap();
        let nearest = repo.nearest_active_base(19.076, 72.877).await.unwrap();
        assert_eq!(nearest.unwrap().base_id, "BASE-001");
    }

    #[tokio::test]
    async fn telemetry_is_newest_first_and_limited() {
        let repo = MemoryRepository::new();
        for i in 0..5 {
            let point = TelemetryPoint {
                mission_id: "MSN-0001".to_string(),
                drone_id: "DRN-0001".to_string(),
                timestamp: Utc::now(),
                position: Position::new(72.877, 19.076, 50.0),
                altitude_agl_m: 50.0,
                heading_deg: 0.0,
                speed_mps: 10.0,
                battery_pct: 100.0 - i as f64,
                waypoint_index: i,
                progress_pct: i as f64 * 10.0,
                phase: Default::default(),
            };
            repo.append_telemetry(&point).await.unwrap();
        }

        let recent = repo.recent_telemetry("MSN-0001", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].waypoint_index, 4);
        assert_eq!(recent[2].waypoint_index, 2);
    }
}
