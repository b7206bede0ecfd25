//! Persistence abstraction for missions, drones, bases and logs.
//!
//! Every orchestrator component takes a `Repository` capability instead of
//! touching a global store, so tests substitute the in-memory
//! implementation. Writes are atomic per entity; multi-entity state changes
//! are sequenced by the single task that owns the mission.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::{init_database, SqliteRepository};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use survey_core::geo;
use survey_core::models::{
    Base, Drone, HandoffLog, Mission, MissionPhase, MissionStatus, TelemetryPoint,
};
use survey_core::Result;

/// Mission listing filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MissionFilter {
    pub status: Option<MissionStatus>,
    pub site_name: Option<String>,
    pub assigned_drone_id: Option<String>,
}

impl MissionFilter {
    pub fn with_status(status: MissionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, mission: &Mission) -> bool {
        if let Some(status) = self.status {
            if mission.status != status {
                return false;
            }
        }
        if let Some(site) = &self.site_name {
            if &mission.site_name != site {
                return false;
            }
        }
        if let Some(drone_id) = &self.assigned_drone_id {
            if mission.assigned_drone_id.as_ref() != Some(drone_id) {
                return false;
            }
        }
        true
    }
}

/// Storage operations consumed by the orchestrator.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_mission(&self, mission_id: &str) -> Result<Mission>;
    async fn save_mission(&self, mission: &Mission) -> Result<()>;
    /// Targeted per-tick write of execution state. Keeps the executor's
    /// frequent updates from clobbering handoff fields written by the
    /// coordinator between a reload and a save.
    async fn update_mission_progress(
        &self,
        mission_id: &str,
        progress_pct: f64,
        waypoint_index: usize,
        phase: MissionPhase,
    ) -> Result<()>;
    async fn delete_mission(&self, mission_id: &str) -> Result<()>;
    /// Missions matching the filter, newest first.
    async fn query_missions(&self, filter: &MissionFilter) -> Result<Vec<Mission>>;

    async fn get_drone(&self, drone_id: &str) -> Result<Drone>;
    async fn save_drone(&self, drone: &Drone) -> Result<()>;
    /// Every registered drone, for fleet sweeps and stats.
    async fn list_drones(&self) -> Result<Vec<Drone>>;
    /// Drones with status `available`, optionally restricted to a base and
    /// a battery floor, sorted by battery descending.
    async fn available_drones(
        &self,
        base_id: Option<&str>,
        min_battery_pct: Option<f64>,
    ) -> Result<Vec<Drone>>;

    async fn get_base(&self, base_id: &str) -> Result<Base>;
    async fn save_base(&self, base: &Base) -> Result<()>;
    async fn active_bases(&self) -> Result<Vec<Base>>;

    /// Nearest base with status `active`, by great-circle distance.
    async fn nearest_active_base(&self, lat: f64, lng: f64) -> Result<Option<Base>> {
        let bases = self.active_bases().await?;
        Ok(bases.into_iter().min_by(|a, b| {
            let da = geo::haversine_distance(lng, lat, a.location.lng, a.location.lat);
            let db = geo::haversine_distance(lng, lat, b.location.lng, b.location.lat);
            da.total_cmp(&db)
        }))
    }

    async fn append_telemetry(&self, point: &TelemetryPoint) -> Result<()>;
    /// Latest `limit` telemetry points for a mission, newest first.
    async fn recent_telemetry(&self, mission_id: &str, limit: usize)
        -> Result<Vec<TelemetryPoint>>;

    async fn append_handoff_log(&self, entry: &HandoffLog) -> Result<()>;
    /// All handoff events for a mission in chronological order.
    async fn handoff_history(&self, mission_id: &str) -> Result<Vec<HandoffLog>>;
    /// Recent handoff events a drone took part in, newest first.
    async fn drone_activity(&self, drone_id: &str, limit: usize) -> Result<Vec<HandoffLog>>;
}

/// Run a repository operation, retrying transient failures with a fixed
/// backoff. Non-transient errors surface immediately.
pub async fn with_retry<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::warn!(%err, attempt, "transient repository error, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
