//! Per-mission execution loop.
//!
//! Owns the simulator for one mission: advances it every tick, persists
//! progress and telemetry, publishes events, and hands critical-battery
//! and rendezvous decisions to the handoff coordinator.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use survey_core::models::{DroneStatus, HandoffKind, HandoffLog, MissionPhase, MissionStatus, TelemetryPoint};
use survey_core::{Result, Simulator, SurveyError};

use crate::bus::{MissionEvent, TelemetryBus};
use crate::config::Config;
use crate::handoff::HandoffCoordinator;
use crate::loops::{charging, sleep_or_shutdown};
use crate::repository::{with_retry, Repository};

/// Shared dependencies for one mission executor.
#[derive(Clone)]
pub struct ExecutorEnv {
    pub repo: Arc<dyn Repository>,
    pub bus: Arc<TelemetryBus>,
    pub config: Config,
    pub shutdown: broadcast::Sender<()>,
}

impl ExecutorEnv {
    pub fn coordinator(&self) -> HandoffCoordinator {
        HandoffCoordinator::new(
            self.repo.clone(),
            self.bus.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        )
    }
}

/// Run the execution loop for one mission until it completes, aborts,
/// fails, or the process shuts down.
pub async fn run_mission_loop(
    env: ExecutorEnv,
    mission_id: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(mission_id, "mission executor started");
    match drive_mission(&env, &mission_id, &mut shutdown).await {
        Ok(()) => info!(mission_id, "mission executor exited"),
        Err(err) => {
            error!(mission_id, %err, "mission executor failed");
            fail_mission(&env, &mission_id).await;
        }
    }
}

async fn drive_mission(
    env: &ExecutorEnv,
    mission_id: &str,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<()> {
    let coordinator = env.coordinator();
    let tick = env.config.tick_interval();
    let tick_secs = env.config.tick_interval_secs;

    let mission = env.repo.get_mission(mission_id).await?;
    let mut current_drone_id = mission.assigned_drone_id.clone().ok_or_else(|| {
        SurveyError::IllegalState(format!("mission '{mission_id}' has no assigned drone"))
    })?;
    let drone = env.repo.get_drone(&current_drone_id).await?;
    let mut sim = Simulator::from_mission(&mission, &drone)?;
    let mut last_phase = mission.phase;

    loop {
        let mission = env.repo.get_mission(mission_id).await?;
        match mission.status {
            MissionStatus::Paused => {
                if !sleep_or_shutdown(tick, shutdown).await {
                    return Ok(());
                }
                continue;
            }
            MissionStatus::InProgress => {}
            MissionStatus::Aborted | MissionStatus::Failed => {
                release_drone(env, mission_id, &current_drone_id).await;
                return Ok(());
            }
            _ => return Ok(()),
        }

        // A handoff completed by the replacement flight shows up here as a
        // changed assignment; carry on with the incoming drone's battery.
        if let Some(assigned) = &mission.assigned_drone_id {
            if assigned != &current_drone_id {
                let incoming = env.repo.get_drone(assigned).await?;
                info!(
                    mission_id,
                    outgoing = %current_drone_id,
                    incoming = %incoming.drone_id,
                    "executor rebinding to replacement drone"
                );
                sim.rebind_battery(incoming.battery_level);
                current_drone_id = incoming.drone_id;
            }
        }

        let r = sim.advance(tick_secs);

        if r.phase != last_phase && r.phase != MissionPhase::Completed {
            env.bus.publish(MissionEvent::PhaseChange {
                mission_id: mission_id.to_string(),
                old_phase: last_phase,
                new_phase: r.phase,
                timestamp: Utc::now(),
            });
            last_phase = r.phase;
        }

        let progress_write = with_retry(
            env.config.telemetry_retry_attempts,
            env.config.telemetry_retry_backoff,
            || {
                env.repo.update_mission_progress(
                    mission_id,
                    r.progress_pct,
                    r.waypoint_index,
                    r.phase,
                )
            },
        )
        .await;
        if let Err(err) = progress_write {
            warn!(mission_id, %err, "progress write failed, continuing");
        }

        let point = TelemetryPoint {
            mission_id: mission_id.to_string(),
            drone_id: current_drone_id.clone(),
            timestamp: Utc::now(),
            position: r.position,
            altitude_agl_m: r.position.alt,
            heading_deg: r.heading_deg,
            speed_mps: r.speed_mps,
            battery_pct: r.battery_pct,
            waypoint_index: r.waypoint_index,
            progress_pct: r.progress_pct,
            phase: r.phase,
        };
        let telemetry_write = with_retry(
            env.config.telemetry_retry_attempts,
            env.config.telemetry_retry_backoff,
            || env.repo.append_telemetry(&point),
        )
        .await;
        if let Err(err) = telemetry_write {
            warn!(mission_id, %err, "telemetry write failed, continuing");
        }

        // Drone position/battery mirror, best-effort
        match env.repo.get_drone(&current_drone_id).await {
            Ok(mut drone) => {
                drone.location = r.position;
                drone.battery_level = r.battery_pct;
                drone.updated_at = Utc::now();
                if let Err(err) = env.repo.save_drone(&drone).await {
                    warn!(mission_id, %err, "drone state write failed, continuing");
                }
            }
            Err(err) => warn!(mission_id, %err, "drone reload failed, continuing"),
        }

        env.bus.publish(MissionEvent::Telemetry {
            mission_id: mission_id.to_string(),
            timestamp: point.timestamp,
            position: r.position,
            altitude_m: r.position.alt,
            heading_deg: r.heading_deg,
            speed_mps: r.speed_mps,
            battery_pct: r.battery_pct,
            waypoint_index: r.waypoint_index,
            progress_pct: r.progress_pct,
            phase: r.phase,
        });

        // Rendezvous detection (the replacement flight checks too;
        // `complete` is idempotent whichever fires first)
        let mut swapped_this_tick = false;
        if let Some(replacement_id) = &mission.pending_replacement_drone_id {
            if let Ok(replacement) = env.repo.get_drone(replacement_id).await {
                let gap_m = sim.current_position().distance_m(&replacement.location);
                if gap_m <= env.config.rendezvous_radius_m {
                    if let Some(incoming) = coordinator.complete(mission_id).await? {
                        sim.rebind_battery(incoming.battery_level);
                        current_drone_id = incoming.drone_id;
                        swapped_this_tick = true;
                    }
                }
            }
        }

        // The tick-start snapshot of `pending_replacement_drone_id` also
        // guards the window where the flight completed the handoff after
        // this tick's reload: the battery reading is the outgoing drone's
        // until the next reload rebinds.
        if !swapped_this_tick
            && mission.pending_replacement_drone_id.is_none()
            && sim.battery_pct() <= env.config.critical_battery_pct
        {
            coordinator.trigger_replacement(mission_id).await?;
        }

        if r.complete {
            complete_mission(env, mission_id, &current_drone_id).await?;
            env.bus.publish(MissionEvent::MissionComplete {
                mission_id: mission_id.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        if !sleep_or_shutdown(tick, shutdown).await {
            return Ok(());
        }
    }
}

/// Mark the mission completed and put its drone on charge. Idempotent.
async fn complete_mission(env: &ExecutorEnv, mission_id: &str, drone_id: &str) -> Result<()> {
    let mut mission = env.repo.get_mission(mission_id).await?;
    if mission.status == MissionStatus::Completed {
        return Ok(());
    }

    mission.status = MissionStatus::Completed;
    mission.phase = MissionPhase::Completed;
    mission.progress_pct = 100.0;
    mission.completed_at = Some(Utc::now());
    mission.pending_replacement_drone_id = None;
    mission.handoff_location = None;
    env.repo.save_mission(&mission).await?;

    let mut drone = env.repo.get_drone(drone_id).await?;
    drone.status = DroneStatus::Charging;
    drone.current_mission_id = None;
    drone.location = drone.home_base;
    drone.updated_at = Utc::now();
    env.repo.save_drone(&drone).await?;

    let mut log = HandoffLog::new(&mission, HandoffKind::Complete, "Mission completed")
        .with_outgoing(&drone);
    if let Some(base_id) = &drone.base_id {
        log = log.with_base(base_id.clone());
    }
    env.repo.append_handoff_log(&log).await?;

    info!(mission_id, drone_id, "mission completed, drone charging");
    tokio::spawn(charging::run_charging(
        env.repo.clone(),
        env.config.clone(),
        drone.drone_id.clone(),
        env.shutdown.clone(),
    ));

    Ok(())
}

/// Failure policy: mark the mission failed and put the drone back in the
/// available pool. Best-effort; the error that got us here already logged.
async fn fail_mission(env: &ExecutorEnv, mission_id: &str) {
    let drone_id = match env.repo.get_mission(mission_id).await {
        Ok(mut mission) => {
            let drone_id = mission.assigned_drone_id.clone();
            if !matches!(
                mission.status,
                MissionStatus::Completed | MissionStatus::Aborted
            ) {
                mission.status = MissionStatus::Failed;
                if let Err(err) = env.repo.save_mission(&mission).await {
                    warn!(mission_id, %err, "could not persist failed status");
                }
            }
            drone_id
        }
        Err(err) => {
            warn!(mission_id, %err, "could not reload mission to mark failed");
            None
        }
    };

    if let Some(drone_id) = drone_id {
        release_drone(env, mission_id, &drone_id).await;
    }
}

/// Return the drone to the available pool if this mission still owns it.
async fn release_drone(env: &ExecutorEnv, mission_id: &str, drone_id: &str) {
    match env.repo.get_drone(drone_id).await {
        Ok(mut drone) => {
            let owned = drone.current_mission_id.as_deref() == Some(mission_id);
            if owned && drone.status == DroneStatus::InFlight {
                drone.status = DroneStatus::Available;
                drone.current_mission_id = None;
                drone.updated_at = Utc::now();
                if let Err(err) = env.repo.save_drone(&drone).await {
                    warn!(mission_id, drone_id, %err, "could not release drone");
                }
            }
        }
        Err(err) => warn!(mission_id, drone_id, %err, "could not reload drone to release"),
    }
}
