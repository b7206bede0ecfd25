//! Survey Core - Pure logic for mission planning and flight simulation
//!
//! This crate contains the domain models, flight path generation and the
//! per-tick drone simulator with NO networking or storage dependencies.

pub mod error;
pub mod geo;
pub mod models;
pub mod planner;
pub mod sim;

pub use error::{Result, SurveyError};
pub use models::{
    Base, BaseStatus, Drone, DroneStatus, FlightPath, HandoffKind, HandoffLog, Mission,
    MissionPhase, MissionStatus, PatternType, Position, SurveyPolygon, TelemetryPoint, Waypoint,
    WaypointAction,
};
pub use sim::{Simulator, TickResult};
