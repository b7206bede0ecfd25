//! Autonomous return-to-base flight after a handoff, abort or completion.
//!
//! Interpolates the drone from the handoff point back to its home base at
//! a fixed cruise speed, clamped so the whole flight takes between 5 and
//! 30 seconds, then docks the drone and starts it charging.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use survey_core::geo;
use survey_core::models::{DroneStatus, HandoffKind, HandoffLog, Position};

use crate::config::Config;
use crate::loops::{charging, sleep_or_shutdown};
use crate::repository::Repository;

pub async fn run_return_flight(
    repo: Arc<dyn Repository>,
    config: Config,
    mission_id: String,
    drone_id: String,
    from: Position,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();

    let home = match repo.get_drone(&drone_id).await {
        Ok(drone) => drone.home_base,
        Err(err) => {
            warn!(drone_id, %err, "return flight could not load drone");
            return;
        }
    };

    let distance_m = from.distance_m(&home);
    let travel_secs = (distance_m / config.return_speed_mps)
        .clamp(config.return_time_min_secs, config.return_time_max_secs);
    let ticks = travel_secs.ceil().max(1.0) as u32;
    info!(
        mission_id,
        drone_id,
        distance_m = format!("{distance_m:.0}"),
        travel_secs = format!("{travel_secs:.0}"),
        "return flight departing"
    );

    for tick in 1..=ticks {
        if !sleep_or_shutdown(Duration::from_secs(1), &mut shutdown_rx).await {
            return;
        }

        let ratio = tick as f64 / ticks as f64;
        let (lng, lat) = geo::interpolate_position(
            (from.lng, from.lat),
            (home.lng, home.lat),
            ratio,
        );
        let alt = from.alt + (home.alt - from.alt) * ratio;

        match repo.get_drone(&drone_id).await {
            Ok(mut drone) => {
                if drone.status != DroneStatus::Returning {
                    info!(drone_id, status = ?drone.status, "return flight preempted");
                    return;
                }
                drone.location = Position::new(lng, lat, alt);
                drone.updated_at = Utc::now();
                if let Err(err) = repo.save_drone(&drone).await {
                    warn!(drone_id, %err, "return position write failed");
                }
            }
            Err(err) => {
                warn!(drone_id, %err, "return flight lost its drone");
                return;
            }
        }
    }

    // Docked: snap to base and start charging
    let mut drone = match repo.get_drone(&drone_id).await {
        Ok(drone) => drone,
        Err(err) => {
            warn!(drone_id, %err, "return flight could not dock drone");
            return;
        }
    };
    drone.status = DroneStatus::Charging;
    drone.location = home;
    drone.returning_mission_id = None;
    drone.updated_at = Utc::now();
    if let Err(err) = repo.save_drone(&drone).await {
        warn!(drone_id, %err, "could not persist docked drone");
        return;
    }
    info!(mission_id, drone_id, "drone returned to base, charging");

    if let Ok(mission) = repo.get_mission(&mission_id).await {
        let mut log = HandoffLog::new(&mission, HandoffKind::ReturnToBase, "Returned to base")
            .with_outgoing(&drone);
        if let Some(base_id) = &drone.base_id {
            log = log.with_base(base_id.clone());
        }
        if let Err(err) = repo.append_handoff_log(&log).await {
            warn!(mission_id, drone_id, %err, "could not log return to base");
        }
    }

    tokio::spawn(charging::run_charging(repo, config, drone_id, shutdown));
}
