//! Replacement drone flight toward a handoff rendezvous.
//!
//! Walks a travel path one waypoint per tick, persisting the drone's
//! position so the mission executor can see it closing in. Self-cancels
//! when the mission stops wanting this replacement, and carries a hard
//! wall-clock budget so a stuck flight can never strand the drone.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use survey_core::models::{DroneStatus, Position};
use survey_core::planner;
use survey_core::Result;

use crate::config::Config;
use crate::handoff::HandoffCoordinator;
use crate::loops::sleep_or_shutdown;
use crate::repository::Repository;

enum FlightOutcome {
    Arrived,
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_replacement_flight(
    repo: Arc<dyn Repository>,
    config: Config,
    coordinator: HandoffCoordinator,
    mission_id: String,
    drone_id: String,
    target: Position,
    altitude_m: f64,
    shutdown: broadcast::Sender<()>,
) {
    let budget = Duration::from_secs(config.replacement_flight_timeout_secs);
    let mut shutdown_rx = shutdown.subscribe();

    let flight = fly_to_rendezvous(
        &*repo,
        &config,
        &mission_id,
        &drone_id,
        target,
        altitude_m,
        &mut shutdown_rx,
    );

    match tokio::time::timeout(budget, flight).await {
        Ok(Ok(FlightOutcome::Arrived)) => {
            if let Err(err) = coordinator.complete(&mission_id).await {
                warn!(mission_id, drone_id, %err, "handoff completion failed after arrival");
            }
        }
        Ok(Ok(FlightOutcome::Cancelled)) => {
            info!(mission_id, drone_id, "replacement flight cancelled");
        }
        Ok(Err(err)) => {
            warn!(mission_id, drone_id, %err, "replacement flight error");
            restore_if_dispatching(&*repo, &drone_id).await;
        }
        Err(_elapsed) => {
            // Budget exhausted: snap to the rendezvous if the mission still
            // wants this drone, otherwise put it back in the pool.
            warn!(mission_id, drone_id, "replacement flight exceeded budget");
            if still_wanted(&*repo, &mission_id, &drone_id).await {
                if let Ok(mut drone) = repo.get_drone(&drone_id).await {
                    drone.location = target;
                    drone.updated_at = Utc::now();
                    let _ = repo.save_drone(&drone).await;
                }
                if let Err(err) = coordinator.complete(&mission_id).await {
                    warn!(mission_id, drone_id, %err, "handoff completion failed after timeout");
                }
            } else {
                restore_if_dispatching(&*repo, &drone_id).await;
            }
        }
    }
}

async fn fly_to_rendezvous(
    repo: &dyn Repository,
    config: &Config,
    mission_id: &str,
    drone_id: &str,
    target: Position,
    altitude_m: f64,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<FlightOutcome> {
    let drone = repo.get_drone(drone_id).await?;
    let path = planner::plan_travel(
        drone.location.lng,
        drone.location.lat,
        target.lng,
        target.lat,
        altitude_m,
    );
    info!(
        mission_id,
        drone_id,
        waypoints = path.len(),
        "replacement flight departing"
    );

    for waypoint in &path {
        if !sleep_or_shutdown(config.tick_interval(), shutdown).await {
            return Ok(FlightOutcome::Cancelled);
        }

        if !still_wanted(repo, mission_id, drone_id).await {
            restore_if_dispatching(repo, drone_id).await;
            return Ok(FlightOutcome::Cancelled);
        }

        let mut drone = repo.get_drone(drone_id).await?;
        drone.location = waypoint.position();
        drone.updated_at = Utc::now();
        if let Err(err) = repo.save_drone(&drone).await {
            warn!(mission_id, drone_id, %err, "replacement position write failed");
        }

        if drone.location.distance_m(&target) <= config.rendezvous_radius_m {
            return Ok(FlightOutcome::Arrived);
        }
    }

    // The final waypoint is the rendezvous itself
    Ok(FlightOutcome::Arrived)
}

/// The mission still wants this drone as its replacement.
async fn still_wanted(repo: &dyn Repository, mission_id: &str, drone_id: &str) -> bool {
    match repo.get_mission(mission_id).await {
        Ok(mission) => {
            mission.status.is_active()
                && mission.pending_replacement_drone_id.as_deref() == Some(drone_id)
        }
        Err(_) => false,
    }
}

async fn restore_if_dispatching(repo: &dyn Repository, drone_id: &str) {
    match repo.get_drone(drone_id).await {
        Ok(mut drone) if drone.status == DroneStatus::Dispatching => {
            drone.status = DroneStatus::Available;
            drone.updated_at = Utc::now();
            if let Err(err) = repo.save_drone(&drone).await {
                warn!(drone_id, %err, "could not restore cancelled replacement");
            }
        }
        Ok(_) => {}
        Err(err) => warn!(drone_id, %err, "could not reload cancelled replacement"),
    }
}
