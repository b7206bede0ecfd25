//! Per-tick flight simulation along a mission's waypoint list.
//!
//! The simulator owns position, altitude, heading and battery for one
//! drone flying one flight path. Distances are budgeted per leg: the leg
//! arriving at waypoint `i` belongs to the phase waypoint `i` is in, so
//! survey progress reaches exactly 100% when the last survey waypoint is
//! reached.

use crate::error::{Result, SurveyError};
use crate::geo;
use crate::models::{Drone, FlightPath, Mission, MissionPhase, Position, Waypoint};

/// Battery drain in percent per minute of flight.
pub const BATTERY_DRAIN_RATE_PCT_PER_MIN: f64 = 2.0;
/// Fallback cruise speed when the mission does not set one.
pub const DEFAULT_SPEED_MPS: f64 = 5.0;

/// Telemetry snapshot produced by one simulation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub complete: bool,
    pub position: Position,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub battery_pct: f64,
    pub waypoint_index: usize,
    /// Percent of survey distance covered, clamped to [0, 100]
    pub progress_pct: f64,
    pub phase: MissionPhase,
    pub distance_traveled_m: f64,
}

/// Simulates a drone flying a waypoint list on a fixed tick.
#[derive(Debug, Clone)]
pub struct Simulator {
    waypoints: Vec<Waypoint>,
    current_index: usize,
    /// (lng, lat)
    position: (f64, f64),
    altitude_m: f64,
    speed_mps: f64,
    heading_deg: f64,
    battery_pct: f64,
    distance_traveled_m: f64,
    survey_distance_traveled_m: f64,
    travel_prefix_len: usize,
    return_suffix_start: usize,
    travel_distance_m: f64,
    survey_distance_m: f64,
}

impl Simulator {
    /// Fresh simulator at the head of a flight path.
    pub fn new(path: &FlightPath, speed_mps: f64, battery_pct: f64) -> Self {
        Self::with_state(path, speed_mps, battery_pct, 0, 0.0, None)
    }

    /// Rebuild a simulator from a persisted mission and its assigned drone.
    ///
    /// Survey progress is reconstructed from the persisted percentage; the
    /// drone's last known location keeps the trajectory continuous across
    /// an executor restart.
    pub fn from_mission(mission: &Mission, drone: &Drone) -> Result<Self> {
        let path = mission.flight_path.as_ref().ok_or_else(|| {
            SurveyError::Validation(format!(
                "mission '{}' has no flight path to simulate",
                mission.mission_id
            ))
        })?;
        if path.waypoints.is_empty() {
            return Err(SurveyError::Validation(format!(
                "mission '{}' has an empty flight path",
                mission.mission_id
            )));
        }

        let position = if mission.current_waypoint_index > 0 {
            Some(drone.location)
        } else {
            None
        };
        Ok(Self::with_state(
            path,
            mission.speed_mps,
            drone.battery_level,
            mission.current_waypoint_index,
            mission.progress_pct,
            position,
        ))
    }

    fn with_state(
        path: &FlightPath,
        speed_mps: f64,
        battery_pct: f64,
        current_index: usize,
        progress_pct: f64,
        position: Option<Position>,
    ) -> Self {
        let waypoints = path.waypoints.clone();
        let travel_prefix_len = path.travel_prefix_len();
        let return_suffix_start = path.return_suffix_start();

        let leg = |i: usize| -> f64 {
            geo::haversine_distance(
                waypoints[i].lng,
                waypoints[i].lat,
                waypoints[i + 1].lng,
                waypoints[i + 1].lat,
            )
        };
        // Leg i arrives at waypoint i+1; phase of a leg is the phase of its
        // arrival waypoint.
        let mut travel_distance_m = 0.0;
        let mut survey_distance_m = 0.0;
        for i in 0..waypoints.len().saturating_sub(1) {
            let arrival = i + 1;
            if arrival < travel_prefix_len {
                travel_distance_m += leg(i);
            } else if arrival < return_suffix_start {
                survey_distance_m += leg(i);
            }
        }

        let start = position.unwrap_or_else(|| {
            waypoints
                .get(current_index.min(waypoints.len().saturating_sub(1)))
                .map(Waypoint::position)
                .unwrap_or_else(|| Position::new(0.0, 0.0, 50.0))
        });

        let survey_distance_traveled_m = (progress_pct / 100.0) * survey_distance_m;
        // Resuming mid-flight: the travel leg is behind us plus whatever
        // share of the survey the persisted progress says was covered
        let distance_traveled_m = if current_index > 0 {
            travel_distance_m + survey_distance_traveled_m
        } else {
            0.0
        };

        Self {
            current_index,
            position: (start.lng, start.lat),
            altitude_m: start.alt,
            speed_mps: if speed_mps > 0.0 {
                speed_mps
            } else {
                DEFAULT_SPEED_MPS
            },
            heading_deg: 0.0,
            battery_pct,
            distance_traveled_m,
            survey_distance_traveled_m,
            travel_prefix_len,
            return_suffix_start,
            travel_distance_m,
            survey_distance_m,
            waypoints,
        }
    }

    /// Phase implied by the current waypoint index.
    pub fn phase(&self) -> MissionPhase {
        if self.current_index >= self.waypoints.len() {
            MissionPhase::Completed
        } else if self.current_index < self.travel_prefix_len {
            MissionPhase::Traveling
        } else if self.current_index >= self.return_suffix_start {
            MissionPhase::Returning
        } else {
            MissionPhase::Surveying
        }
    }

    pub fn battery_pct(&self) -> f64 {
        self.battery_pct
    }

    /// Swap in the incoming drone's battery after a handoff. Position,
    /// waypoint index and accumulated distances are untouched.
    pub fn rebind_battery(&mut self, battery_pct: f64) {
        self.battery_pct = battery_pct;
    }

    pub fn current_position(&self) -> Position {
        Position::new(self.position.0, self.position.1, self.altitude_m)
    }

    /// Advance the simulation by `dt_secs`.
    pub fn advance(&mut self, dt_secs: f64) -> TickResult {
        if self.current_index >= self.waypoints.len() {
            return self.result(true);
        }

        let surveying = self.phase() == MissionPhase::Surveying;
        let target = self.waypoints[self.current_index].clone();
        let distance_to_target =
            geo::haversine_distance(self.position.0, self.position.1, target.lng, target.lat);
        let step = self.speed_mps * dt_secs;

        if distance_to_target <= step {
            // Snap to the waypoint rather than overshooting
            self.position = (target.lng, target.lat);
            self.altitude_m = target.alt;
            self.distance_traveled_m += distance_to_target;
            if surveying {
                self.survey_distance_traveled_m += distance_to_target;
            }
            self.current_index += 1;

            if self.current_index >= self.waypoints.len() {
                return self.result(true);
            }
        } else {
            let fraction = step / distance_to_target;
            self.position = geo::interpolate_position(
                self.position,
                (target.lng, target.lat),
                fraction,
            );
            self.altitude_m += (target.alt - self.altitude_m) * fraction;
            self.distance_traveled_m += step;
            if surveying {
                self.survey_distance_traveled_m += step;
            }
        }

        self.heading_deg =
            geo::bearing(self.position.0, self.position.1, target.lng, target.lat);
        self.battery_pct =
            (self.battery_pct - BATTERY_DRAIN_RATE_PCT_PER_MIN * dt_secs / 60.0).max(0.0);

        self.result(false)
    }

    fn result(&self, complete: bool) -> TickResult {
        let progress_pct = if self.survey_distance_m > 0.0 {
            (self.survey_distance_traveled_m / self.survey_distance_m * 100.0).min(100.0)
        } else if complete {
            100.0
        } else {
            0.0
        };

        TickResult {
            complete,
            position: self.current_position(),
            heading_deg: self.heading_deg,
            speed_mps: self.speed_mps,
            battery_pct: self.battery_pct,
            waypoint_index: self.current_index,
            progress_pct,
            phase: self.phase(),
            distance_traveled_m: self.distance_traveled_m,
        }
    }
}
