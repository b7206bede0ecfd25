//! Core data models for the survey system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

/// A position in (lng, lat, alt) order, matching GeoJSON coordinate order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lng: f64,
    pub lat: f64,
    #[serde(default)]
    pub alt: f64,
}

impl Position {
    pub fn new(lng: f64, lat: f64, alt: f64) -> Self {
        Self { lng, lat, alt }
    }

    /// Horizontal great-circle distance to another position in meters.
    pub fn distance_m(&self, other: &Position) -> f64 {
        geo::haversine_distance(self.lng, self.lat, other.lng, other.lat)
    }
}

/// Action performed at a waypoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointAction {
    #[default]
    Fly,
    Hover,
    Photo,
    Video,
}

/// A single position directive in a flight path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    /// Meters above ground level
    pub alt: f64,
    #[serde(default)]
    pub action: WaypointAction,
    /// Seconds to stay at the waypoint
    #[serde(default)]
    pub duration_secs: f64,
}

impl Waypoint {
    pub fn new(lng: f64, lat: f64, alt: f64, action: WaypointAction) -> Self {
        Self {
            lat,
            lng,
            alt,
            action,
            duration_secs: 0.0,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.lng, self.lat, self.alt)
    }
}

/// Flight path generation pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Waypoint,
    #[default]
    Crosshatch,
    Perimeter,
    Spiral,
}

/// Ordered waypoint sequence with pattern metadata.
///
/// Travel and return segments are identified positionally: the contiguous
/// run of `fly` waypoints at the head is travel, and everything after the
/// last non-`fly` waypoint is return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightPath {
    pub pattern: PatternType,
    pub waypoints: Vec<Waypoint>,
    /// Meters over the full waypoint list
    pub total_distance_m: f64,
    /// Seconds at the mission's planned speed
    pub estimated_duration_secs: f64,
}

impl FlightPath {
    /// Number of travel waypoints prepended before the survey body.
    pub fn travel_prefix_len(&self) -> usize {
        self.waypoints
            .iter()
            .take_while(|wp| wp.action == WaypointAction::Fly)
            .count()
    }

    /// Index where the return segment begins (`len` when there is none).
    pub fn return_suffix_start(&self) -> usize {
        let last_non_fly = self
            .waypoints
            .iter()
            .rposition(|wp| wp.action != WaypointAction::Fly);
        match last_non_fly {
            Some(idx) => (idx + 1).max(self.travel_prefix_len()),
            // All-fly path: everything is travel, nothing is return
            None => self.waypoints.len(),
        }
    }
}

/// GeoJSON-style polygon; only the outer ring is considered.
///
/// Ring coordinates are `[lng, lat]` pairs. Longitudes are normalized to
/// [-180, 180] at the planning boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyPolygon {
    /// First ring is the outer boundary; holes are ignored
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl SurveyPolygon {
    pub fn from_outer_ring(ring: Vec<[f64; 2]>) -> Self {
        Self { rings: vec![ring] }
    }

    pub fn outer_ring(&self) -> &[[f64; 2]] {
        self.rings.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Copy with every longitude mapped into [-180, 180].
    pub fn normalized(&self) -> Self {
        Self {
            rings: self
                .rings
                .iter()
                .map(|ring| {
                    ring.iter()
                        .map(|c| [geo::normalize_longitude(c[0]), c[1]])
                        .collect()
                })
                .collect(),
        }
    }

    /// Vertex-average centroid of the outer ring as (lat, lng).
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let ring = self.outer_ring();
        if ring.is_empty() {
            return None;
        }
        let n = ring.len() as f64;
        let lng = ring.iter().map(|c| c[0]).sum::<f64>() / n;
        let lat = ring.iter().map(|c| c[1]).sum::<f64>() / n;
        Some((lat, lng))
    }

    /// Bounding box of the outer ring as (min_lng, min_lat, max_lng, max_lat).
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let ring = self.outer_ring();
        let first = ring.first()?;
        let mut bounds = (first[0], first[1], first[0], first[1]);
        for c in ring {
            bounds.0 = bounds.0.min(c[0]);
            bounds.1 = bounds.1.min(c[1]);
            bounds.2 = bounds.2.max(c[0]);
            bounds.3 = bounds.3.max(c[1]);
        }
        Some(bounds)
    }

    /// A polygon needs at least 3 vertices to enclose area. The closing
    /// duplicate vertex, when present, does not count.
    pub fn has_enough_vertices(&self) -> bool {
        let ring = self.outer_ring();
        let mut len = ring.len();
        if len >= 2 && ring.first() == ring.last() {
            len -= 1;
        }
        len >= 3
    }
}

/// Current state of a drone in the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    /// Parked at base, charged enough to fly
    #[default]
    Available,
    /// Executing a mission
    InFlight,
    /// Flying to a rendezvous as a replacement
    Dispatching,
    /// Flying home after a handoff, abort, or completion
    Returning,
    Charging,
    /// Externally set; the orchestrator never overrides these
    Maintenance,
    Offline,
}

/// A drone in the fleet with its operational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub drone_id: String,
    pub name: String,
    pub model: String,
    pub status: DroneStatus,
    /// Percent in [0, 100]
    pub battery_level: f64,
    pub location: Position,
    /// Coordinates of the base this drone launches from and returns to
    pub home_base: Position,
    pub base_id: Option<String>,
    pub current_mission_id: Option<String>,
    /// Mission this drone is flying home from. `current_mission_id` is
    /// already cleared when a handoff or abort releases the drone, so the
    /// return leg carries its provenance here until docking.
    #[serde(default)]
    pub returning_mission_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Drone {
    /// Whether the orchestrator may change this drone's status.
    /// `maintenance` and `offline` are externally owned.
    pub fn is_orchestratable(&self) -> bool {
        !matches!(self.status, DroneStatus::Maintenance | DroneStatus::Offline)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseStatus {
    #[default]
    Active,
    Maintenance,
    Offline,
}

/// A station drones launch from, return to, and charge at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub base_id: String,
    pub name: String,
    /// GeoJSON Point semantics: (lng, lat)
    pub location: Position,
    pub status: BaseStatus,
    pub max_drones: u32,
    pub operational_radius_km: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Draft,
    Scheduled,
    InProgress,
    Paused,
    Completed,
    Aborted,
    Failed,
}

impl MissionStatus {
    /// A mission in these states has (or may have) tasks running for it.
    pub fn is_active(&self) -> bool {
        matches!(self, MissionStatus::InProgress | MissionStatus::Paused)
    }
}

/// Which segment of the waypoint list the drone is flying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    #[default]
    Idle,
    Traveling,
    Surveying,
    Returning,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyType {
    #[default]
    Mapping,
    Inspection,
    Surveillance,
    Delivery,
}

/// A survey mission with its flight path and execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub site_name: String,
    pub survey_type: SurveyType,

    pub coverage_area: Option<SurveyPolygon>,
    pub flight_path: Option<FlightPath>,
    /// Meters AGL
    pub altitude_m: f64,
    /// Meters per second
    pub speed_mps: f64,
    /// Percent in [0, 90], drives crosshatch line spacing
    pub overlap_pct: f64,

    pub status: MissionStatus,
    pub phase: MissionPhase,
    /// Percent of SURVEY distance covered (travel and return excluded)
    pub progress_pct: f64,
    pub current_waypoint_index: usize,

    pub assigned_drone_id: Option<String>,
    pub origin_base_id: Option<String>,
    /// Set while a replacement is in flight but not yet the owner
    pub pending_replacement_drone_id: Option<String>,
    /// Where the outgoing drone was when the replacement was dispatched
    pub handoff_location: Option<Position>,
    pub abort_reason: Option<String>,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(mission_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            name: name.into(),
            description: String::new(),
            site_name: String::new(),
            survey_type: SurveyType::default(),
            coverage_area: None,
            flight_path: None,
            altitude_m: 50.0,
            speed_mps: 10.0,
            overlap_pct: 70.0,
            status: MissionStatus::Draft,
            phase: MissionPhase::Idle,
            progress_pct: 0.0,
            current_waypoint_index: 0,
            assigned_drone_id: None,
            origin_base_id: None,
            pending_replacement_drone_id: None,
            handoff_location: None,
            abort_reason: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Time-series telemetry sample recorded every simulation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub mission_id: String,
    pub drone_id: String,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    pub altitude_agl_m: f64,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub battery_pct: f64,
    pub waypoint_index: usize,
    pub progress_pct: f64,
    pub phase: MissionPhase,
}

/// Kind of event recorded in the handoff log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffKind {
    /// Mission started with its initial drone
    Start,
    /// Replacement sent toward the rendezvous
    ReplacementDispatched,
    /// Ownership swapped at rendezvous
    HandoffComplete,
    /// A drone arrived back at its base
    ReturnToBase,
    /// Mission aborted with no replacement available
    MissionAborted,
    /// Mission finished
    Complete,
}

/// Append-only record of a mission lifecycle / handoff event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffLog {
    pub mission_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: HandoffKind,
    pub outgoing_drone_id: Option<String>,
    pub outgoing_drone_battery: Option<f64>,
    pub incoming_drone_id: Option<String>,
    pub incoming_drone_battery: Option<f64>,
    pub base_id: Option<String>,
    pub waypoint_index: usize,
    pub progress_pct: f64,
    pub reason: String,
}

impl HandoffLog {
    pub fn new(mission: &Mission, kind: HandoffKind, reason: impl Into<String>) -> Self {
        Self {
            mission_id: mission.mission_id.clone(),
            timestamp: Utc::now(),
            kind,
            outgoing_drone_id: None,
            outgoing_drone_battery: None,
            incoming_drone_id: None,
            incoming_drone_battery: None,
            base_id: None,
            waypoint_index: mission.current_waypoint_index,
            progress_pct: mission.progress_pct,
            reason: reason.into(),
        }
    }

    pub fn with_outgoing(mut self, drone: &Drone) -> Self {
        self.outgoing_drone_id = Some(drone.drone_id.clone());
        self.outgoing_drone_battery = Some(drone.battery_level);
        self
    }

    pub fn with_incoming(mut self, drone: &Drone) -> Self {
        self.incoming_drone_id = Some(drone.drone_id.clone());
        self.incoming_drone_battery = Some(drone.battery_level);
        self
    }

    pub fn with_base(mut self, base_id: impl Into<String>) -> Self {
        self.base_id = Some(base_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(action: WaypointAction) -> Waypoint {
        Waypoint::new(72.87, 19.07, 50.0, action)
    }

    #[test]
    fn travel_prefix_and_return_suffix() {
        let path = FlightPath {
            pattern: PatternType::Crosshatch,
            waypoints: vec![
                wp(WaypointAction::Fly),
                wp(WaypointAction::Fly),
                wp(WaypointAction::Fly),
                wp(WaypointAction::Photo),
                wp(WaypointAction::Fly),
                wp(WaypointAction::Photo),
                wp(WaypointAction::Fly),
                wp(WaypointAction::Fly),
            ],
            ..Default::default()
        };
        assert_eq!(path.travel_prefix_len(), 3);
        // Return starts after the last photo waypoint
        assert_eq!(path.return_suffix_start(), 6);
    }

    #[test]
    fn all_fly_path_is_pure_travel() {
        let path = FlightPath {
            pattern: PatternType::Waypoint,
            waypoints: vec![wp(WaypointAction::Fly), wp(WaypointAction::Fly)],
            ..Default::default()
        };
        assert_eq!(path.travel_prefix_len(), 2);
        assert_eq!(path.return_suffix_start(), 2);
    }

    #[test]
    fn polygon_vertex_count_ignores_closing_duplicate() {
        let open = SurveyPolygon::from_outer_ring(vec![
            [72.87, 19.07],
            [72.88, 19.07],
            [72.88, 19.08],
        ]);
        assert!(open.has_enough_vertices());

        let closed = SurveyPolygon::from_outer_ring(vec![
            [72.87, 19.07],
            [72.88, 19.07],
            [72.87, 19.07],
        ]);
        assert!(!closed.has_enough_vertices());
    }

    #[test]
    fn polygon_centroid_and_bounds() {
        let poly = SurveyPolygon::from_outer_ring(vec![
            [72.87, 19.07],
            [72.88, 19.07],
            [72.88, 19.08],
            [72.87, 19.08],
        ]);
        let (lat, lng) = poly.centroid().unwrap();
        assert!((lat - 19.075).abs() < 1e-9);
        assert!((lng - 72.875).abs() < 1e-9);
        assert_eq!(poly.bounds().unwrap(), (72.87, 19.07, 72.88, 19.08));
    }

    #[test]
    fn polygon_normalization_wraps_longitudes() {
        let poly = SurveyPolygon::from_outer_ring(vec![[-282.0, 19.07], [190.0, 19.08]]);
        let ring = poly.normalized();
        let ring = ring.outer_ring();
        assert!((ring[0][0] - 78.0).abs() < 1e-9);
        assert!((ring[1][0] - (-170.0)).abs() < 1e-9);
    }
}
