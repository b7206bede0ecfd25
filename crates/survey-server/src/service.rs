//! Mission-control operations consumed by the outer API layer.
//!
//! All state transitions flow through here or the tasks this layer
//! spawns; callers get typed errors (`Validation`, `IllegalState`,
//! `NotFound`, `NoDroneAvailable`) rather than exceptions.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use survey_core::models::{
    Base, BaseStatus, Drone, DroneStatus, FlightPath, HandoffKind, HandoffLog, Mission,
    MissionPhase, MissionStatus, PatternType, SurveyPolygon, SurveyType, TelemetryPoint, Waypoint,
};
use survey_core::{geo, planner, Result, SurveyError};

use crate::bus::TelemetryBus;
use crate::config::Config;
use crate::fleet;
use crate::repository::{MissionFilter, Repository};
use crate::supervisor::Supervisor;

/// Request to create a mission.
#[derive(Debug, Clone)]
pub struct NewMission {
    pub name: String,
    pub description: String,
    pub site_name: String,
    pub survey_type: SurveyType,
    pub coverage_area: Option<SurveyPolygon>,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub overlap_pct: f64,
    pub pattern: PatternType,
    pub assigned_drone_id: Option<String>,
    /// Explicit waypoints instead of a generated pattern
    pub waypoints: Option<Vec<Waypoint>>,
}

impl Default for NewMission {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            site_name: String::new(),
            survey_type: SurveyType::Mapping,
            coverage_area: None,
            altitude_m: 50.0,
            speed_mps: 10.0,
            overlap_pct: 70.0,
            pattern: PatternType::Crosshatch,
            assigned_drone_id: None,
            waypoints: None,
        }
    }
}

/// Partial mission update; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct MissionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub survey_type: Option<SurveyType>,
    pub coverage_area: Option<SurveyPolygon>,
    pub altitude_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub overlap_pct: Option<f64>,
    /// `Some(None)` clears the assignment
    pub assigned_drone_id: Option<Option<String>>,
}

/// Request to register a drone at a base.
#[derive(Debug, Clone)]
pub struct NewDrone {
    pub name: String,
    pub model: String,
    pub base_id: String,
}

/// Request to register a base.
#[derive(Debug, Clone)]
pub struct NewBase {
    pub base_id: String,
    pub name: String,
    pub lng: f64,
    pub lat: f64,
    pub max_drones: u32,
    pub operational_radius_km: f64,
}

/// Mission-control service facade.
#[derive(Clone)]
pub struct MissionService {
    repo: Arc<dyn Repository>,
    bus: Arc<TelemetryBus>,
    supervisor: Arc<Supervisor>,
    config: Config,
}

impl MissionService {
    pub fn new(
        repo: Arc<dyn Repository>,
        bus: Arc<TelemetryBus>,
        supervisor: Arc<Supervisor>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            bus,
            supervisor,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<TelemetryBus> {
        &self.bus
    }

    pub async fn create_mission(&self, input: NewMission) -> Result<Mission> {
        if input.name.trim().is_empty() {
            return Err(SurveyError::Validation("mission name is required".into()));
        }
        validate_overlap(input.overlap_pct)?;
        if let Some(drone_id) = &input.assigned_drone_id {
            self.repo.get_drone(drone_id).await.map_err(|_| {
                SurveyError::Validation(format!("drone '{drone_id}' not found"))
            })?;
        }

        let count = self.repo.query_missions(&MissionFilter::default()).await?.len();
        let mut mission = Mission::new(format!("MSN-{:04}", count + 1), input.name);
        mission.description = input.description;
        mission.site_name = input.site_name;
        mission.survey_type = input.survey_type;
        mission.coverage_area = input.coverage_area.map(|area| area.normalized());
        mission.altitude_m = input.altitude_m;
        mission.speed_mps = input.speed_mps;
        mission.overlap_pct = input.overlap_pct;
        mission.assigned_drone_id = input.assigned_drone_id;

        if let Some(waypoints) = input.waypoints {
            let waypoints: Vec<Waypoint> = waypoints
                .into_iter()
                .map(|mut wp| {
                    wp.lng = geo::normalize_longitude(wp.lng);
                    wp
                })
                .collect();
            let total_distance_m = planner::path_distance(&waypoints);
            mission.flight_path = Some(FlightPath {
                pattern: input.pattern,
                waypoints,
                total_distance_m,
                estimated_duration_secs: planner::estimate_duration(
                    total_distance_m,
                    mission.speed_mps,
                ),
            });
        } else if let Some(area) = &mission.coverage_area {
            let path = planner::plan(
                area,
                input.pattern,
                mission.altitude_m,
                mission.overlap_pct,
                mission.speed_mps,
            );
            if !path.waypoints.is_empty() {
                mission.flight_path = Some(path);
            }
        }

        self.repo.save_mission(&mission).await?;
        info!(mission_id = %mission.mission_id, "mission created");
        Ok(mission)
    }

    pub async fn update_mission(&self, mission_id: &str, update: MissionUpdate) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if mission.status == MissionStatus::InProgress {
            return Err(SurveyError::IllegalState(
                "cannot update a mission while it is in progress".into(),
            ));
        }

        if let Some(name) = update.name {
            mission.name = name;
        }
        if let Some(description) = update.description {
            mission.description = description;
        }
        if let Some(site_name) = update.site_name {
            mission.site_name = site_name;
        }
        if let Some(survey_type) = update.survey_type {
            mission.survey_type = survey_type;
        }
        if let Some(area) = update.coverage_area {
            mission.coverage_area = Some(area.normalized());
        }
        if let Some(altitude_m) = update.altitude_m {
            mission.altitude_m = altitude_m;
        }
        if let Some(speed_mps) = update.speed_mps {
            mission.speed_mps = speed_mps;
        }
        if let Some(overlap_pct) = update.overlap_pct {
            validate_overlap(overlap_pct)?;
            mission.overlap_pct = overlap_pct;
        }
        if let Some(assignment) = update.assigned_drone_id {
            if let Some(drone_id) = &assignment {
                self.repo.get_drone(drone_id).await.map_err(|_| {
                    SurveyError::Validation(format!("drone '{drone_id}' not found"))
                })?;
            }
            mission.assigned_drone_id = assignment;
        }

        self.repo.save_mission(&mission).await?;
        Ok(mission)
    }

    pub async fn delete_mission(&self, mission_id: &str) -> Result<()> {
        let mission = self.repo.get_mission(mission_id).await?;
        if mission.status == MissionStatus::InProgress {
            return Err(SurveyError::IllegalState(
                "cannot delete a mission while it is in progress".into(),
            ));
        }
        self.repo.delete_mission(mission_id).await
    }

    pub async fn get_mission(&self, mission_id: &str) -> Result<Mission> {
        self.repo.get_mission(mission_id).await
    }

    pub async fn list_missions(&self, filter: &MissionFilter) -> Result<Vec<Mission>> {
        self.repo.query_missions(filter).await
    }

    /// Regenerate the survey waypoints from the coverage area.
    pub async fn generate_path(&self, mission_id: &str) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if mission.status == MissionStatus::InProgress {
            return Err(SurveyError::IllegalState(
                "cannot regenerate the path of a running mission".into(),
            ));
        }
        let area = mission.coverage_area.clone().ok_or_else(|| {
            SurveyError::Validation("mission has no coverage area defined".into())
        })?;

        let pattern = mission
            .flight_path
            .as_ref()
            .map(|p| p.pattern)
            .unwrap_or(PatternType::Crosshatch);
        let path = planner::plan(
            &area,
            pattern,
            mission.altitude_m,
            mission.overlap_pct,
            mission.speed_mps,
        );
        if path.waypoints.is_empty() {
            return Err(SurveyError::Validation(
                "coverage polygon needs at least 3 vertices".into(),
            ));
        }

        mission.flight_path = Some(path);
        self.repo.save_mission(&mission).await?;
        Ok(mission)
    }

    /// Start executing a mission: assign a drone, build the full travel +
    /// survey + return path, flip states, and hand the mission to its
    /// executor task.
    pub async fn start_mission(&self, mission_id: &str) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if !matches!(
            mission.status,
            MissionStatus::Draft | MissionStatus::Scheduled
        ) {
            return Err(SurveyError::IllegalState(format!(
                "cannot start mission with status '{:?}'",
                mission.status
            )));
        }

        let mut drone = match &mission.assigned_drone_id {
            Some(drone_id) => {
                let assigned = self.repo.get_drone(drone_id).await.map_err(|_| {
                    SurveyError::Validation(format!("assigned drone '{drone_id}' not found"))
                })?;
                if assigned.status == DroneStatus::Available {
                    assigned
                } else {
                    fleet::auto_assign(&*self.repo, &mission).await?
                }
            }
            None => fleet::auto_assign(&*self.repo, &mission).await?,
        };
        mission.assigned_drone_id = Some(drone.drone_id.clone());
        mission.origin_base_id = drone.base_id.clone();

        let has_path = mission
            .flight_path
            .as_ref()
            .map(|p| !p.waypoints.is_empty())
            .unwrap_or(false);
        if !has_path {
            let area = mission.coverage_area.clone().ok_or_else(|| {
                SurveyError::Validation(
                    "mission has no coverage area and no flight path defined".into(),
                )
            })?;
            let pattern = mission
                .flight_path
                .as_ref()
                .map(|p| p.pattern)
                .unwrap_or(PatternType::Crosshatch);
            let path = planner::plan(
                &area,
                pattern,
                mission.altitude_m,
                mission.overlap_pct,
                mission.speed_mps,
            );
            if path.waypoints.is_empty() {
                return Err(SurveyError::Validation(
                    "coverage polygon needs at least 3 vertices".into(),
                ));
            }
            mission.flight_path = Some(path);
        }

        let altitude_m = mission.altitude_m;
        let speed_mps = mission.speed_mps;
        if let Some(path) = mission.flight_path.as_mut() {
            for wp in &mut path.waypoints {
                wp.lng = geo::normalize_longitude(wp.lng);
            }

            // Bracket the survey with travel out from the base and the
            // return leg home
            if let Some(base_id) = &drone.base_id {
                if let Ok(base) = self.repo.get_base(base_id).await {
                    let first = path.waypoints.first().cloned();
                    let last = path.waypoints.last().cloned();
                    if let (Some(first), Some(last)) = (first, last) {
                        let travel = planner::plan_travel(
                            base.location.lng,
                            base.location.lat,
                            first.lng,
                            first.lat,
                            altitude_m,
                        );
                        let ret = planner::plan_travel(
                            last.lng,
                            last.lat,
                            base.location.lng,
                            base.location.lat,
                            altitude_m,
                        );
                        info!(
                            mission_id,
                            travel = travel.len(),
                            ret = ret.len(),
                            "bracketing survey with travel and return legs"
                        );
                        let mut waypoints = travel;
                        waypoints.append(&mut path.waypoints);
                        waypoints.extend(ret);
                        path.waypoints = waypoints;
                    }
                    path.total_distance_m = planner::path_distance(&path.waypoints);
                    path.estimated_duration_secs =
                        planner::estimate_duration(path.total_distance_m, speed_mps);
                }
            }
        }

        mission.status = MissionStatus::InProgress;
        mission.phase = MissionPhase::Traveling;
        mission.progress_pct = 0.0;
        mission.current_waypoint_index = 0;
        mission.pending_replacement_drone_id = None;
        mission.handoff_location = None;
        mission.abort_reason = None;
        mission.started_at = Some(Utc::now());
        mission.completed_at = None;
        self.repo.save_mission(&mission).await?;

        drone.status = DroneStatus::InFlight;
        drone.current_mission_id = Some(mission.mission_id.clone());
        drone.updated_at = Utc::now();
        self.repo.save_drone(&drone).await?;

        let mut log = HandoffLog::new(&mission, HandoffKind::Start, "Mission started")
            .with_incoming(&drone);
        if let Some(base_id) = &mission.origin_base_id {
            log = log.with_base(base_id.clone());
        }
        self.repo.append_handoff_log(&log).await?;

        self.supervisor.spawn_executor(&mission.mission_id);
        info!(mission_id, drone_id = %drone.drone_id, "mission started");
        Ok(mission)
    }

    pub async fn pause_mission(&self, mission_id: &str) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if mission.status != MissionStatus::InProgress {
            return Err(SurveyError::IllegalState("mission is not in progress".into()));
        }
        mission.status = MissionStatus::Paused;
        self.repo.save_mission(&mission).await?;
        info!(mission_id, "mission paused");
        Ok(mission)
    }

    pub async fn resume_mission(&self, mission_id: &str) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if mission.status != MissionStatus::Paused {
            return Err(SurveyError::IllegalState("mission is not paused".into()));
        }
        mission.status = MissionStatus::InProgress;
        self.repo.save_mission(&mission).await?;
        // The idling executor picks the change up at its next reload; after
        // a process restart this spawns a fresh one.
        self.supervisor.spawn_executor(mission_id);
        info!(mission_id, "mission resumed");
        Ok(mission)
    }

    pub async fn abort_mission(&self, mission_id: &str) -> Result<Mission> {
        let mut mission = self.repo.get_mission(mission_id).await?;
        if !mission.status.is_active() {
            return Err(SurveyError::IllegalState(
                "only a running or paused mission can be aborted".into(),
            ));
        }
        mission.status = MissionStatus::Aborted;
        mission.abort_reason = Some("Aborted by operator".into());
        mission.completed_at = Some(Utc::now());
        self.repo.save_mission(&mission).await?;
        info!(mission_id, "mission aborted by operator");
        Ok(mission)
    }

    pub async fn telemetry(&self, mission_id: &str, limit: usize) -> Result<Vec<TelemetryPoint>> {
        self.repo.recent_telemetry(mission_id, limit).await
    }

    pub async fn handoff_history(&self, mission_id: &str) -> Result<Vec<HandoffLog>> {
        self.repo.handoff_history(mission_id).await
    }

    pub async fn drone_activity(&self, drone_id: &str, limit: usize) -> Result<Vec<HandoffLog>> {
        self.repo.drone_activity(drone_id, limit).await
    }

    pub async fn register_drone(&self, input: NewDrone) -> Result<Drone> {
        let base = self.repo.get_base(&input.base_id).await.map_err(|_| {
            SurveyError::Validation(format!("base '{}' not found", input.base_id))
        })?;

        let count = self.repo.list_drones().await?.len();
        let drone = Drone {
            drone_id: format!("DRN-{:04}", count + 1),
            name: input.name,
            model: input.model,
            status: DroneStatus::Available,
            battery_level: 100.0,
            location: base.location,
            home_base: base.location,
            base_id: Some(base.base_id.clone()),
            current_mission_id: None,
            returning_mission_id: None,
            updated_at: Utc::now(),
        };
        self.repo.save_drone(&drone).await?;
        info!(drone_id = %drone.drone_id, base_id = %base.base_id, "drone registered");
        Ok(drone)
    }

    pub async fn register_base(&self, input: NewBase) -> Result<Base> {
        if self.repo.get_base(&input.base_id).await.is_ok() {
            return Err(SurveyError::Validation(format!(
                "base '{}' already exists",
                input.base_id
            )));
        }
        let base = Base {
            base_id: input.base_id,
            name: input.name,
            location: survey_core::models::Position::new(
                geo::normalize_longitude(input.lng),
                input.lat,
                0.0,
            ),
            status: BaseStatus::Active,
            max_drones: input.max_drones,
            operational_radius_km: input.operational_radius_km,
        };
        self.repo.save_base(&base).await?;
        info!(base_id = %base.base_id, "base registered");
        Ok(base)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn validate_overlap(overlap_pct: f64) -> Result<()> {
    if !(0.0..=90.0).contains(&overlap_pct) {
        return Err(SurveyError::Validation(format!(
            "overlap must be between 0 and 90 percent, got {overlap_pct}"
        )));
    }
    Ok(())
}
