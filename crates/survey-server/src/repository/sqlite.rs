//! SQLite-backed repository.
//!
//! Enum fields are stored under their wire names (snake_case), timestamps
//! as RFC 3339 strings, and structured fields (coverage polygon, flight
//! path, handoff location) as JSON text columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

use survey_core::models::{
    Base, BaseStatus, Drone, DroneStatus, FlightPath, HandoffKind, HandoffLog, Mission,
    MissionPhase, MissionStatus, Position, SurveyPolygon, SurveyType, TelemetryPoint,
};
use survey_core::{Result, SurveyError};

use super::{MissionFilter, Repository};

/// Repository over a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Initialize the SQLite database.
///
/// Creates the database file if it doesn't exist, runs migrations, and
/// returns a ready repository.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<SqliteRepository> {
    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SurveyError::Internal(format!("create database dir: {e}")))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path);
    info!("Connecting to database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&db_url)
        .await
        .map_err(db_err)?;

    run_migrations(&pool).await?;
    Ok(SqliteRepository { pool })
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let migration_sql = include_str!("../../migrations/001_init.sql");
    info!("Running database migrations...");

    for statement in migration_sql.split(';') {
        let statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        if let Err(e) = sqlx::query(statement).execute(pool).await {
            if e.to_string().contains("already exists") {
                continue;
            }
            if statement.to_uppercase().starts_with("CREATE") {
                return Err(SurveyError::Internal(format!(
                    "migration failed on CREATE statement: {e}"
                )));
            }
            warn!("Migration statement failed: {}", e);
        }
    }

    info!("Database migrations complete");
    Ok(())
}

fn db_err(err: sqlx::Error) -> SurveyError {
    match err {
        sqlx::Error::RowNotFound => SurveyError::NotFound("row".to_string()),
        other => SurveyError::TransientIo(other.to_string()),
    }
}

/// Wire name of a unit enum variant ("in_progress", "photo", ...).
fn enum_str<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

fn parse_enum<T: DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_col<T: Serialize>(value: &Option<T>) -> Option<String> {
    value
        .as_ref()
        .and_then(|v| serde_json::to_string(v).ok())
}

const MISSION_COLUMNS: &str = "mission_id, name, description, site_name, survey_type, \
     coverage_area, flight_path, altitude_m, speed_mps, overlap_pct, status, phase, \
     progress_pct, current_waypoint_index, assigned_drone_id, origin_base_id, \
     pending_replacement_drone_id, handoff_location, abort_reason, started_at, \
     completed_at, created_at";

#[derive(sqlx::FromRow)]
struct MissionRow {
    mission_id: String,
    name: String,
    description: String,
    site_name: String,
    survey_type: String,
    coverage_area: Option<String>,
    flight_path: Option<String>,
    altitude_m: f64,
    speed_mps: f64,
    overlap_pct: f64,
    status: String,
    phase: String,
    progress_pct: f64,
    current_waypoint_index: i64,
    assigned_drone_id: Option<String>,
    origin_base_id: Option<String>,
    pending_replacement_drone_id: Option<String>,
    handoff_location: Option<String>,
    abort_reason: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

impl From<MissionRow> for Mission {
    fn from(row: MissionRow) -> Self {
        Mission {
            mission_id: row.mission_id,
            name: row.name,
            description: row.description,
            site_name: row.site_name,
            survey_type: parse_enum::<SurveyType>(&row.survey_type).unwrap_or_default(),
            coverage_area: row
                .coverage_area
                .as_deref()
                .and_then(|s| serde_json::from_str::<SurveyPolygon>(s).ok()),
            flight_path: row
                .flight_path
                .as_deref()
                .and_then(|s| serde_json::from_str::<FlightPath>(s).ok()),
            altitude_m: row.altitude_m,
            speed_mps: row.speed_mps,
            overlap_pct: row.overlap_pct,
            status: parse_enum::<MissionStatus>(&row.status).unwrap_or_default(),
            phase: parse_enum::<MissionPhase>(&row.phase).unwrap_or_default(),
            progress_pct: row.progress_pct,
            current_waypoint_index: row.current_waypoint_index.max(0) as usize,
            assigned_drone_id: row.assigned_drone_id,
            origin_base_id: row.origin_base_id,
            pending_replacement_drone_id: row.pending_replacement_drone_id,
            handoff_location: row
                .handoff_location
                .as_deref()
                .and_then(|s| serde_json::from_str::<Position>(s).ok()),
            abort_reason: row.abort_reason,
            started_at: row.started_at.as_deref().map(parse_time),
            completed_at: row.completed_at.as_deref().map(parse_time),
            created_at: parse_time(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct DroneRow {
    drone_id: String,
    name: String,
    model: String,
    status: String,
    battery_level: f64,
    lng: f64,
    lat: f64,
    alt: f64,
    home_lng: f64,
    home_lat: f64,
    home_alt: f64,
    base_id: Option<String>,
    current_mission_id: Option<String>,
    returning_mission_id: Option<String>,
    updated_at: String,
}

impl From<DroneRow> for Drone {
    fn from(row: DroneRow) -> Self {
        Drone {
            drone_id: row.drone_id,
            name: row.name,
            model: row.model,
            status: parse_enum::<DroneStatus>(&row.status).unwrap_or(DroneStatus::Offline),
            battery_level: row.battery_level,
            location: Position::new(row.lng, row.lat, row.alt),
            home_base: Position::new(row.home_lng, row.home_lat, row.home_alt),
            base_id: row.base_id,
            current_mission_id: row.current_mission_id,
            returning_mission_id: row.returning_mission_id,
            updated_at: parse_time(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct BaseRow {
    base_id: String,
    name: String,
    lng: f64,
    lat: f64,
    status: String,
    max_drones: i64,
    operational_radius_km: f64,
}

impl From<BaseRow> for Base {
    fn from(row: BaseRow) -> Self {
        Base {
            base_id: row.base_id,
            name: row.name,
            location: Position::new(row.lng, row.lat, 0.0),
            status: parse_enum::<BaseStatus>(&row.status).unwrap_or(BaseStatus::Offline),
            max_drones: row.max_drones.max(0) as u32,
            operational_radius_km: row.operational_radius_km,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TelemetryRow {
    mission_id: String,
    drone_id: String,
    timestamp: String,
    lng: f64,
    lat: f64,
    alt: f64,
    altitude_agl_m: f64,
    heading_deg: f64,
    speed_mps: f64,
    battery_pct: f64,
    waypoint_index: i64,
    progress_pct: f64,
    phase: String,
}

impl From<TelemetryRow> for TelemetryPoint {
    fn from(row: TelemetryRow) -> Self {
        TelemetryPoint {
            mission_id: row.mission_id,
            drone_id: row.drone_id,
            timestamp: parse_time(&row.timestamp),
            position: Position::new(row.lng, row.lat, row.alt),
            altitude_agl_m: row.altitude_agl_m,
            heading_deg: row.heading_deg,
            speed_mps: row.speed_mps,
            battery_pct: row.battery_pct,
            waypoint_index: row.waypoint_index.max(0) as usize,
            progress_pct: row.progress_pct,
            phase: parse_enum::<MissionPhase>(&row.phase).unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct HandoffRow {
    mission_id: String,
    timestamp: String,
    kind: String,
    outgoing_drone_id: Option<String>,
    outgoing_drone_battery: Option<f64>,
    incoming_drone_id: Option<String>,
    incoming_drone_battery: Option<f64>,
    base_id: Option<String>,
    waypoint_index: i64,
    progress_pct: f64,
    reason: String,
}

impl From<HandoffRow> for HandoffLog {
    fn from(row: HandoffRow) -> Self {
        HandoffLog {
            mission_id: row.mission_id,
            timestamp: parse_time(&row.timestamp),
            kind: parse_enum::<HandoffKind>(&row.kind).unwrap_or(HandoffKind::Start),
            outgoing_drone_id: row.outgoing_drone_id,
            outgoing_drone_battery: row.outgoing_drone_battery,
            incoming_drone_id: row.incoming_drone_id,
            incoming_drone_battery: row.incoming_drone_battery,
            base_id: row.base_id,
            waypoint_index: row.waypoint_index.max(0) as usize,
            progress_pct: row.progress_pct,
            reason: row.reason,
        }
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_mission(&self, mission_id: &str) -> Result<Mission> {
        let row = sqlx::query_as::<_, MissionRow>(&format!(
            "SELECT {MISSION_COLUMNS} FROM missions WHERE mission_id = ?1"
        ))
        .bind(mission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Mission::from)
            .ok_or_else(|| SurveyError::NotFound(format!("mission '{mission_id}'")))
    }

    async fn save_mission(&self, mission: &Mission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO missions (mission_id, name, description, site_name, survey_type,
                coverage_area, flight_path, altitude_m, speed_mps, overlap_pct, status, phase,
                progress_pct, current_waypoint_index, assigned_drone_id, origin_base_id,
                pending_replacement_drone_id, handoff_location, abort_reason, started_at,
                completed_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22)
            ON CONFLICT(mission_id) DO UPDATE SET
                name = ?2, description = ?3, site_name = ?4, survey_type = ?5,
                coverage_area = ?6, flight_path = ?7, altitude_m = ?8, speed_mps = ?9,
                overlap_pct = ?10, status = ?11, phase = ?12, progress_pct = ?13,
                current_waypoint_index = ?14, assigned_drone_id = ?15, origin_base_id = ?16,
                pending_replacement_drone_id = ?17, handoff_location = ?18, abort_reason = ?19,
                started_at = ?20, completed_at = ?21
            "#,
        )
        .bind(&mission.mission_id)
        .bind(&mission.name)
        .bind(&mission.description)
        .bind(&mission.site_name)
        .bind(enum_str(&mission.survey_type))
        .bind(json_col(&mission.coverage_area))
        .bind(json_col(&mission.flight_path))
        .bind(mission.altitude_m)
        .bind(mission.speed_mps)
        .bind(mission.overlap_pct)
        .bind(enum_str(&mission.status))
        .bind(enum_str(&mission.phase))
        .bind(mission.progress_pct)
        .bind(mission.current_waypoint_index as i64)
        .bind(&mission.assigned_drone_id)
        .bind(&mission.origin_base_id)
        .bind(&mission.pending_replacement_drone_id)
        .bind(json_col(&mission.handoff_location))
        .bind(&mission.abort_reason)
        .bind(mission.started_at.map(|t| t.to_rfc3339()))
        .bind(mission.completed_at.map(|t| t.to_rfc3339()))
        .bind(mission.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update_mission_progress(
        &self,
        mission_id: &str,
        progress_pct: f64,
        waypoint_index: usize,
        phase: MissionPhase,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE missions SET progress_pct = ?2, current_waypoint_index = ?3, phase = ?4 \
             WHERE mission_id = ?1",
        )
        .bind(mission_id)
        .bind(progress_pct)
        .bind(waypoint_index as i64)
        .bind(enum_str(&phase))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(SurveyError::NotFound(format!("mission '{mission_id}'")));
        }
        Ok(())
    }

    async fn delete_mission(&self, mission_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM missions WHERE mission_id = ?1")
            .bind(mission_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(SurveyError::NotFound(format!("mission '{mission_id}'")));
        }
        Ok(())
    }

    async fn query_missions(&self, filter: &MissionFilter) -> Result<Vec<Mission>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {MISSION_COLUMNS} FROM missions WHERE 1=1"));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(enum_str(&status));
        }
        if let Some(site) = &filter.site_name {
            qb.push(" AND site_name = ").push_bind(site.clone());
        }
        if let Some(drone_id) = &filter.assigned_drone_id {
            qb.push(" AND assigned_drone_id = ").push_bind(drone_id.clone());
        }
        qb.push(" ORDER BY created_at DESC");

        let rows = qb
            .build_query_as::<MissionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Mission::from).collect())
    }

    async fn get_drone(&self, drone_id: &str) -> Result<Drone> {
        let row = sqlx::query_as::<_, DroneRow>("SELECT * FROM drones WHERE drone_id = ?1")
            .bind(drone_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Drone::from)
            .ok_or_else(|| SurveyError::NotFound(format!("drone '{drone_id}'")))
    }

    async fn save_drone(&self, drone: &Drone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drones (drone_id, name, model, status, battery_level, lng, lat, alt,
                home_lng, home_lat, home_alt, base_id, current_mission_id,
                returning_mission_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(drone_id) DO UPDATE SET
                name = ?2, model = ?3, status = ?4, battery_level = ?5,
                lng = ?6, lat = ?7, alt = ?8, home_lng = ?9, home_lat = ?10, home_alt = ?11,
                base_id = ?12, current_mission_id = ?13, returning_mission_id = ?14,
                updated_at = ?15
            "#,
        )
        .bind(&drone.drone_id)
        .bind(&drone.name)
        .bind(&drone.model)
        .bind(enum_str(&drone.status))
        .bind(drone.battery_level)
        .bind(drone.location.lng)
        .bind(drone.location.lat)
        .bind(drone.location.alt)
        .bind(drone.home_base.lng)
        .bind(drone.home_base.lat)
        .bind(drone.home_base.alt)
        .bind(&drone.base_id)
        .bind(&drone.current_mission_id)
        .bind(&drone.returning_mission_id)
        .bind(drone.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_drones(&self) -> Result<Vec<Drone>> {
        let rows = sqlx::query_as::<_, DroneRow>("SELECT * FROM drones ORDER BY drone_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Drone::from).collect())
    }

    async fn available_drones(
        &self,
        base_id: Option<&str>,
        min_battery_pct: Option<f64>,
    ) -> Result<Vec<Drone>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM drones WHERE status = ");
        qb.push_bind(enum_str(&DroneStatus::Available));
        if let Some(base_id) = base_id {
            qb.push(" AND base_id = ").push_bind(base_id.to_string());
        }
        if let Some(min) = min_battery_pct {
            qb.push(" AND battery_level >= ").push_bind(min);
        }
        qb.push(" ORDER BY battery_level DESC");

        let rows = qb
            .build_query_as::<DroneRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Drone::from).collect())
    }

    async fn get_base(&self, base_id: &str) -> Result<Base> {
        let row = sqlx::query_as::<_, BaseRow>("SELECT * FROM bases WHERE base_id = ?1")
            .bind(base_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Base::from)
            .ok_or_else(|| SurveyError::NotFound(format!("base '{base_id}'")))
    }

    async fn save_base(&self, base: &Base) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bases (base_id, name, lng, lat, status, max_drones, operational_radius_km)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(base_id) DO UPDATE SET
                name = ?2, lng = ?3, lat = ?4, status = ?5,
                max_drones = ?6, operational_radius_km = ?7
            "#,
        )
        .bind(&base.base_id)
        .bind(&base.name)
        .bind(base.location.lng)
        .bind(base.location.lat)
        .bind(enum_str(&base.status))
        .bind(base.max_drones as i64)
        .bind(base.operational_radius_km)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn active_bases(&self) -> Result<Vec<Base>> {
        let rows = sqlx::query_as::<_, BaseRow>("SELECT * FROM bases WHERE status = ?1")
            .bind(enum_str(&BaseStatus::Active))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Base::from).collect())
    }

    async fn append_telemetry(&self, point: &TelemetryPoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telemetry (mission_id, drone_id, timestamp, lng, lat, alt,
                altitude_agl_m, heading_deg, speed_mps, battery_pct, waypoint_index,
                progress_pct, phase)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&point.mission_id)
        .bind(&point.drone_id)
        .bind(point.timestamp.to_rfc3339())
        .bind(point.position.lng)
        .bind(point.position.lat)
        .bind(point.position.alt)
        .bind(point.altitude_agl_m)
        .bind(point.heading_deg)
        .bind(point.speed_mps)
        .bind(point.battery_pct)
        .bind(point.waypoint_index as i64)
        .bind(point.progress_pct)
        .bind(enum_str(&point.phase))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn recent_telemetry(
        &self,
        mission_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>> {
        let rows = sqlx::query_as::<_, TelemetryRow>(
            "SELECT mission_id, drone_id, timestamp, lng, lat, alt, altitude_agl_m, \
             heading_deg, speed_mps, battery_pct, waypoint_index, progress_pct, phase \
             FROM telemetry WHERE mission_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(mission_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(TelemetryPoint::from).collect())
    }

    async fn append_handoff_log(&self, entry: &HandoffLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO handoff_logs (mission_id, timestamp, kind, outgoing_drone_id,
                outgoing_drone_battery, incoming_drone_id, incoming_drone_battery, base_id,
                waypoint_index, progress_pct, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&entry.mission_id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(enum_str(&entry.kind))
        .bind(&entry.outgoing_drone_id)
        .bind(entry.outgoing_drone_battery)
        .bind(&entry.incoming_drone_id)
        .bind(entry.incoming_drone_battery)
        .bind(&entry.base_id)
        .bind(entry.waypoint_index as i64)
        .bind(entry.progress_pct)
        .bind(&entry.reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn handoff_history(&self, mission_id: &str) -> Result<Vec<HandoffLog>> {
        let rows = sqlx::query_as::<_, HandoffRow>(
            "SELECT mission_id, timestamp, kind, outgoing_drone_id, outgoing_drone_battery, \
             incoming_drone_id, incoming_drone_battery, base_id, waypoint_index, progress_pct, \
             reason FROM handoff_logs WHERE mission_id = ?1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(mission_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(HandoffLog::from).collect())
    }

    async fn drone_activity(&self, drone_id: &str, limit: usize) -> Result<Vec<HandoffLog>> {
        let rows = sqlx::query_as::<_, HandoffRow>(
            "SELECT mission_id, timestamp, kind, outgoing_drone_id, outgoing_drone_battery, \
             incoming_drone_id, incoming_drone_battery, base_id, waypoint_index, progress_pct, \
             reason FROM handoff_logs WHERE outgoing_drone_id = ?1 OR incoming_drone_id = ?1 \
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(drone_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(HandoffLog::from).collect())
    }
}
