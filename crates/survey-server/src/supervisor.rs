//! Process-scoped supervisor for mission executors.
//!
//! Owns the shutdown channel and the executor task handles. At process
//! start it sweeps stale fleet state and re-spawns tasks for work that was
//! in flight when the previous process died: executors for `in_progress`
//! missions, return flights for `returning` drones, charge workers for
//! `charging` drones.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chrono::Utc;
use survey_core::models::{DroneStatus, MissionStatus};
use survey_core::Result;

use crate::bus::TelemetryBus;
use crate::config::Config;
use crate::loops::mission_loop::{run_mission_loop, ExecutorEnv};
use crate::loops::{charging, return_flight};
use crate::repository::{MissionFilter, Repository};

pub struct Supervisor {
    repo: Arc<dyn Repository>,
    bus: Arc<TelemetryBus>,
    config: Config,
    shutdown: broadcast::Sender<()>,
    executors: DashMap<String, JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(repo: Arc<dyn Repository>, bus: Arc<TelemetryBus>, config: Config) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(8);
        Arc::new(Self {
            repo,
            bus,
            config,
            shutdown,
            executors: DashMap::new(),
        })
    }

    pub fn env(&self) -> ExecutorEnv {
        ExecutorEnv {
            repo: self.repo.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Start an executor for a mission unless one is already running.
    pub fn spawn_executor(&self, mission_id: &str) {
        self.executors.retain(|_, handle| !handle.is_finished());

        let running = self
            .executors
            .get(mission_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if running {
            return;
        }

        let env = self.env();
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(run_mission_loop(env, mission_id.to_string(), shutdown_rx));
        self.executors.insert(mission_id.to_string(), handle);
    }

    /// Recover orchestration state after a process restart.
    ///
    /// Returns the number of mission executors re-spawned.
    pub async fn resume_active(&self) -> Result<usize> {
        self.sweep_stale_drones().await?;

        let missions = self
            .repo
            .query_missions(&MissionFilter::with_status(MissionStatus::InProgress))
            .await?;
        for mission in &missions {
            info!(mission_id = %mission.mission_id, "resuming mission executor");
            self.spawn_executor(&mission.mission_id);
        }

        // Pick up interrupted return flights and charges
        for drone in self.repo.list_drones().await? {
            match drone.status {
                DroneStatus::Returning => {
                    // `current_mission_id` was already cleared when the
                    // drone was released; the return leg's provenance
                    // lives in `returning_mission_id`
                    let mission_id = drone.returning_mission_id.clone().unwrap_or_default();
                    info!(drone_id = %drone.drone_id, mission_id, "resuming return flight");
                    tokio::spawn(return_flight::run_return_flight(
                        self.repo.clone(),
                        self.config.clone(),
                        mission_id,
                        drone.drone_id.clone(),
                        drone.location,
                        self.shutdown.clone(),
                    ));
                }
                DroneStatus::Charging => {
                    info!(drone_id = %drone.drone_id, "resuming charge");
                    tokio::spawn(charging::run_charging(
                        self.repo.clone(),
                        self.config.clone(),
                        drone.drone_id.clone(),
                        self.shutdown.clone(),
                    ));
                }
                _ => {}
            }
        }

        Ok(missions.len())
    }

    /// Reset drones marked busy by a previous process whose mission no
    /// longer wants them.
    async fn sweep_stale_drones(&self) -> Result<()> {
        let mut assigned = HashSet::new();
        let mut pending = HashSet::new();
        for status in [MissionStatus::InProgress, MissionStatus::Paused] {
            for mission in self
                .repo
                .query_missions(&MissionFilter::with_status(status))
                .await?
            {
                if let Some(id) = mission.assigned_drone_id {
                    assigned.insert(id);
                }
                if let Some(id) = mission.pending_replacement_drone_id {
                    pending.insert(id);
                }
            }
        }

        for mut drone in self.repo.list_drones().await? {
            let stale = match drone.status {
                DroneStatus::InFlight => !assigned.contains(&drone.drone_id),
                DroneStatus::Dispatching => !pending.contains(&drone.drone_id),
                _ => false,
            };
            if stale {
                warn!(drone_id = %drone.drone_id, status = ?drone.status, "resetting stale drone");
                drone.status = DroneStatus::Available;
                drone.current_mission_id = None;
                drone.updated_at = Utc::now();
                self.repo.save_drone(&drone).await?;
            }
        }
        Ok(())
    }

    /// Signal every task spawned under this supervisor to stop.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Number of executors currently running.
    pub fn running_executors(&self) -> usize {
        self.executors
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }
}
