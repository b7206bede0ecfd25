//! Demo mission runner.
//!
//! Runs a scripted survey against the in-memory repository and streams
//! the mission's events to stdout. Three scenarios:
//!
//! 1. `survey`  - full battery, plain traveling -> surveying -> returning run
//! 2. `handoff` - low battery forces a mid-air replacement from the base
//! 3. `abort`   - low battery with no replacement available
//!
//! Usage:
//!   cargo run -p survey-cli --bin demo_mission -- --scenario handoff

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::sync::Arc;

use survey_core::models::{DroneStatus, MissionStatus, SurveyPolygon};
use survey_server::bus::TelemetryBus;
use survey_server::config::Config;
use survey_server::repository::{MemoryRepository, Repository};
use survey_server::service::{MissionService, NewBase, NewDrone, NewMission};
use survey_server::supervisor::Supervisor;

/// Base location (Mumbai coastal strip)
const BASE_LNG: f64 = 72.877;
const BASE_LAT: f64 = 19.076;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Plain survey, no handoff
    Survey,
    /// Battery goes critical mid-survey, replacement takes over
    Handoff,
    /// Battery goes critical with nothing to dispatch
    Abort,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scripted survey mission demo")]
struct Args {
    #[arg(long, value_enum, default_value_t = Scenario::Survey)]
    scenario: Scenario,

    /// Cruise speed in m/s
    #[arg(long, default_value_t = 12.0)]
    speed: f64,

    /// Survey square side in degrees
    #[arg(long, default_value_t = 0.0008)]
    span: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();
    let args = Args::parse();

    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let bus = Arc::new(TelemetryBus::new());
    let config = Config::default();
    let supervisor = Supervisor::new(repo.clone(), bus.clone(), config.clone());
    let service = MissionService::new(repo.clone(), bus, supervisor, config);

    service
        .register_base(NewBase {
            base_id: "BASE-001".to_string(),
            name: "Coastal Base".to_string(),
            lng: BASE_LNG,
            lat: BASE_LAT,
            max_drones: 10,
            operational_radius_km: 15.0,
        })
        .await?;

    let primary = service
        .register_drone(NewDrone {
            name: "Harrier 1".to_string(),
            model: "quad-x".to_string(),
            base_id: "BASE-001".to_string(),
        })
        .await?;

    match args.scenario {
        Scenario::Survey => {}
        Scenario::Handoff => {
            // Seed the primary low enough to go critical a few ticks in,
            // with a charged spare waiting at the base
            set_battery(&*repo, &primary.drone_id, 21.0).await?;
            service
                .register_drone(NewDrone {
                    name: "Harrier 2".to_string(),
                    model: "quad-x".to_string(),
                    base_id: "BASE-001".to_string(),
                })
                .await?;
        }
        Scenario::Abort => {
            set_battery(&*repo, &primary.drone_id, 21.0).await?;
        }
    }

    let mission = service
        .create_mission(NewMission {
            name: format!("demo {:?}", args.scenario),
            site_name: "demo site".to_string(),
            coverage_area: Some(SurveyPolygon::from_outer_ring(vec![
                [72.87, 19.07],
                [72.87 + args.span, 19.07],
                [72.87 + args.span, 19.07 + args.span],
                [72.87, 19.07 + args.span],
            ])),
            speed_mps: args.speed,
            assigned_drone_id: Some(primary.drone_id.clone()),
            ..Default::default()
        })
        .await?;

    let mut sub = service.bus().subscribe_with_capacity(&mission.mission_id, 4096);
    let started = service.start_mission(&mission.mission_id).await?;
    let path = started.flight_path.as_ref().expect("planned path");
    println!(
        "mission {} started: {} waypoints, {:.0}m, ~{:.0}s",
        started.mission_id,
        path.waypoints.len(),
        path.total_distance_m,
        path.estimated_duration_secs,
    );

    // Stream events until the mission reaches a terminal state
    loop {
        tokio::select! {
            event = sub.rx.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                let mission = repo.get_mission(&mission.mission_id).await?;
                if matches!(
                    mission.status,
                    MissionStatus::Completed | MissionStatus::Aborted | MissionStatus::Failed
                ) {
                    break;
                }
            }
        }
    }

    // Let return flights land and chargers finish before the summary
    wait_for_fleet_idle(&*repo).await?;

    let mission = repo.get_mission(&mission.mission_id).await?;
    println!(
        "mission {} finished: status={:?} progress={:.1}%",
        mission.mission_id, mission.status, mission.progress_pct
    );
    if let Some(reason) = &mission.abort_reason {
        println!("abort reason: {reason}");
    }

    println!("handoff history:");
    for entry in service.handoff_history(&mission.mission_id).await? {
        println!(
            "  {} {:?} out={} in={} wp={} progress={:.1}% {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.kind,
            entry.outgoing_drone_id.as_deref().unwrap_or("-"),
            entry.incoming_drone_id.as_deref().unwrap_or("-"),
            entry.waypoint_index,
            entry.progress_pct,
            entry.reason,
        );
    }

    for drone in repo.list_drones().await? {
        println!(
            "drone {}: {:?} battery={:.1}%",
            drone.drone_id, drone.status, drone.battery_level
        );
    }

    Ok(())
}

async fn set_battery(repo: &dyn Repository, drone_id: &str, battery: f64) -> Result<()> {
    let mut drone = repo.get_drone(drone_id).await?;
    drone.battery_level = battery;
    repo.save_drone(&drone).await?;
    Ok(())
}

/// Wait (bounded) until no drone is still flying, returning or charging.
async fn wait_for_fleet_idle(repo: &dyn Repository) -> Result<()> {
    for _ in 0..90 {
        let busy = repo.list_drones().await?.into_iter().any(|d| {
            matches!(
                d.status,
                DroneStatus::InFlight
                    | DroneStatus::Dispatching
                    | DroneStatus::Returning
                    | DroneStatus::Charging
            )
        });
        if !busy {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    Ok(())
}
