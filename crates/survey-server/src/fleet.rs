//! Drone auto-assignment by base proximity and battery level.

use tracing::info;

use survey_core::models::{Drone, Mission};
use survey_core::{Result, SurveyError};

use crate::repository::Repository;

/// Pick the best available drone for a mission.
///
/// Preference order: highest battery at the nearest active base to the
/// coverage centroid, then highest battery anywhere in the fleet. With no
/// coverage area the base step is skipped.
pub async fn auto_assign(repo: &dyn Repository, mission: &Mission) -> Result<Drone> {
    let center = mission
        .coverage_area
        .as_ref()
        .and_then(|area| area.normalized().centroid());

    if let Some((lat, lng)) = center {
        if let Some(base) = repo.nearest_active_base(lat, lng).await? {
            let at_base = repo.available_drones(Some(&base.base_id), None).await?;
            if let Some(drone) = at_base.into_iter().next() {
                info!(
                    drone_id = %drone.drone_id,
                    base_id = %base.base_id,
                    battery = drone.battery_level,
                    "auto-assigned drone from nearest base"
                );
                return Ok(drone);
            }
        }
    }

    let fleet_wide = repo.available_drones(None, None).await?;
    match fleet_wide.into_iter().next() {
        Some(drone) => {
            info!(
                drone_id = %drone.drone_id,
                battery = drone.battery_level,
                "auto-assigned drone fleet-wide"
            );
            Ok(drone)
        }
        None => Err(SurveyError::NoDroneAvailable(
            "all drones are in flight, charging, or in maintenance".to_string(),
        )),
    }
}
