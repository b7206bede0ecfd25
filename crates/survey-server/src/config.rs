//! Orchestrator configuration from environment.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub database_max_connections: u32,

    /// Simulation tick interval in seconds
    pub tick_interval_secs: f64,
    /// Battery level at or below which a replacement is dispatched
    pub critical_battery_pct: f64,
    /// Minimum battery a replacement candidate must carry
    pub min_battery_for_mission_pct: f64,
    /// Drones this close have met for a handoff, in meters
    pub rendezvous_radius_m: f64,
    /// Charge restored per second while docked
    pub charge_rate_pct_per_sec: f64,
    /// Charging worker gives up after this many iterations
    pub charging_max_ticks: u32,
    /// Wall-clock budget for a replacement flight
    pub replacement_flight_timeout_secs: u64,
    /// Return flights cruise at a fixed speed regardless of drone model
    pub return_speed_mps: f64,
    /// Return flight duration clamp, seconds
    pub return_time_min_secs: f64,
    pub return_time_max_secs: f64,

    /// Telemetry write retries inside a tick
    pub telemetry_retry_attempts: u32,
    pub telemetry_retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "data/survey.db".to_string(),
            database_max_connections: 5,
            tick_interval_secs: 1.0,
            critical_battery_pct: 20.0,
            min_battery_for_mission_pct: 30.0,
            rendezvous_radius_m: 10.0,
            charge_rate_pct_per_sec: 5.0,
            charging_max_ticks: 30,
            replacement_flight_timeout_secs: 60,
            return_speed_mps: 10.0,
            return_time_min_secs: 5.0,
            return_time_max_secs: 30.0,
            telemetry_retry_attempts: 3,
            telemetry_retry_backoff: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("SURVEY_DB_PATH").unwrap_or_else(|_| defaults.database_path.clone()),
            database_max_connections: parse_env(
                "SURVEY_DB_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            tick_interval_secs: parse_env("SURVEY_TICK_SECS", defaults.tick_interval_secs),
            critical_battery_pct: parse_env(
                "SURVEY_CRITICAL_BATTERY_PCT",
                defaults.critical_battery_pct,
            ),
            min_battery_for_mission_pct: parse_env(
                "SURVEY_MIN_BATTERY_PCT",
                defaults.min_battery_for_mission_pct,
            ),
            rendezvous_radius_m: parse_env("SURVEY_RENDEZVOUS_M", defaults.rendezvous_radius_m),
            charge_rate_pct_per_sec: parse_env(
                "SURVEY_CHARGE_RATE_PCT",
                defaults.charge_rate_pct_per_sec,
            ),
            charging_max_ticks: parse_env("SURVEY_CHARGE_MAX_TICKS", defaults.charging_max_ticks),
            replacement_flight_timeout_secs: parse_env(
                "SURVEY_REPLACEMENT_TIMEOUT_SECS",
                defaults.replacement_flight_timeout_secs,
            ),
            ..defaults
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
