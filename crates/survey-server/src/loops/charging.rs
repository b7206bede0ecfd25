//! Recharge worker: linear charge to 100%, then back in the pool.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use survey_core::models::DroneStatus;
use survey_core::SurveyError;

use crate::config::Config;
use crate::loops::sleep_or_shutdown;
use crate::repository::Repository;

/// Charge a drone until full or until something else claims it.
///
/// Reloads the drone every second so an external status change (operator
/// putting it in maintenance, a dispatch) preempts the charge. Bounded by
/// `charging_max_ticks`; on hitting the cap the drone is released as full
/// rather than left stuck in `charging`.
pub async fn run_charging(
    repo: Arc<dyn Repository>,
    config: Config,
    drone_id: String,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();

    for _ in 0..config.charging_max_ticks {
        let mut drone = match repo.get_drone(&drone_id).await {
            Ok(drone) => drone,
            Err(SurveyError::NotFound(_)) => {
                warn!(drone_id, "drone disappeared while charging");
                return;
            }
            Err(err) => {
                warn!(drone_id, %err, "charge tick could not reload drone");
                if !sleep_or_shutdown(Duration::from_secs(1), &mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        };

        if drone.status != DroneStatus::Charging {
            info!(drone_id, status = ?drone.status, "charging preempted");
            return;
        }

        drone.battery_level = (drone.battery_level + config.charge_rate_pct_per_sec).min(100.0);
        if drone.battery_level >= 100.0 {
            drone.battery_level = 100.0;
            drone.status = DroneStatus::Available;
            drone.updated_at = Utc::now();
            if let Err(err) = repo.save_drone(&drone).await {
                warn!(drone_id, %err, "could not persist fully charged drone");
            } else {
                info!(drone_id, "fully charged and available");
            }
            return;
        }

        drone.updated_at = Utc::now();
        if let Err(err) = repo.save_drone(&drone).await {
            warn!(drone_id, %err, "charge tick write failed");
        }

        if !sleep_or_shutdown(Duration::from_secs(1), &mut shutdown_rx).await {
            return;
        }
    }

    // Cap reached; don't leave the drone stuck in `charging`
    if let Ok(mut drone) = repo.get_drone(&drone_id).await {
        if drone.status == DroneStatus::Charging {
            drone.battery_level = 100.0;
            drone.status = DroneStatus::Available;
            drone.updated_at = Utc::now();
            if let Err(err) = repo.save_drone(&drone).await {
                warn!(drone_id, %err, "could not release drone after charge cap");
            } else {
                info!(drone_id, "charge cap reached, drone released as full");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use survey_core::models::{Drone, Position};

    use crate::repository::MemoryRepository;

    fn charging_drone(battery: f64) -> Drone {
        Drone {
            drone_id: "DRN-0001".to_string(),
            name: "alpha".to_string(),
            model: "quad".to_string(),
            status: DroneStatus::Charging,
            battery_level: battery,
            location: Position::new(72.877, 19.076, 0.0),
            home_base: Position::new(72.877, 19.076, 0.0),
            base_id: Some("BASE-001".to_string()),
            current_mission_id: None,
            returning_mission_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn charges_to_full_and_becomes_available() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_drone(&charging_drone(25.0)).await.unwrap();
        let (shutdown, _) = broadcast::channel(1);

        run_charging(
            repo.clone(),
            Config::default(),
            "DRN-0001".to_string(),
            shutdown,
        )
        .await;

        let drone = repo.get_drone("DRN-0001").await.unwrap();
        assert_eq!(drone.battery_level, 100.0);
        assert_eq!(drone.status, DroneStatus::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn preempted_when_status_changes() {
        let repo = Arc::new(MemoryRepository::new());
        let mut drone = charging_drone(10.0);
        drone.status = DroneStatus::Maintenance;
        repo.save_drone(&drone).await.unwrap();
        let (shutdown, _) = broadcast::channel(1);

        run_charging(
            repo.clone(),
            Config::default(),
            "DRN-0001".to_string(),
            shutdown,
        )
        .await;

        let drone = repo.get_drone("DRN-0001").await.unwrap();
        // Untouched: the worker must not override an external status
        assert_eq!(drone.status, DroneStatus::Maintenance);
        assert_eq!(drone.battery_level, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_releases_drone_as_full() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_drone(&charging_drone(0.0)).await.unwrap();
        let (shutdown, _) = broadcast::channel(1);

        let mut config = Config::default();
        // 1%/s for 30 ticks cannot reach 100 organically
        config.charge_rate_pct_per_sec = 1.0;

        run_charging(
            repo.clone(),
            config,
            "DRN-0001".to_string(),
            shutdown,
        )
        .await;

        let drone = repo.get_drone("DRN-0001").await.unwrap();
        assert_eq!(drone.battery_level, 100.0);
        assert_eq!(drone.status, DroneStatus::Available);
    }
}
