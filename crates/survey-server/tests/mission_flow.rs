//! End-to-end mission execution scenarios against the in-memory
//! repository. Time is paused, so simulated minutes run in milliseconds.

use std::sync::Arc;
use std::time::Duration;

use survey_core::models::{
    DroneStatus, HandoffKind, Mission, MissionPhase, MissionStatus, SurveyPolygon,
};
use survey_server::bus::{MissionEvent, Subscription, TelemetryBus};
use survey_server::config::Config;
use survey_server::repository::{MemoryRepository, Repository};
use survey_server::service::{MissionService, NewBase, NewDrone, NewMission};
use survey_server::supervisor::Supervisor;

const BASE_LNG: f64 = 72.877;
const BASE_LAT: f64 = 19.076;

struct Harness {
    repo: Arc<dyn Repository>,
    service: MissionService,
}

async fn harness() -> Harness {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let bus = Arc::new(TelemetryBus::new());
    let config = Config::default();
    let supervisor = Supervisor::new(repo.clone(), bus.clone(), config.clone());
    let service = MissionService::new(repo.clone(), bus, supervisor, config);

    service
        .register_base(NewBase {
            base_id: "BASE-001".to_string(),
            name: "field base".to_string(),
            lng: BASE_LNG,
            lat: BASE_LAT,
            max_drones: 10,
            operational_radius_km: 15.0,
        })
        .await
        .unwrap();

    Harness { repo, service }
}

impl Harness {
    async fn add_drone(&self, battery: f64, status: DroneStatus) -> String {
        let drone = self
            .service
            .register_drone(NewDrone {
                name: "survey drone".to_string(),
                model: "quad-x".to_string(),
                base_id: "BASE-001".to_string(),
            })
            .await
            .unwrap();
        let mut drone = self.repo.get_drone(&drone.drone_id).await.unwrap();
        drone.battery_level = battery;
        drone.status = status;
        self.repo.save_drone(&drone).await.unwrap();
        drone.drone_id
    }

    async fn create_mission(&self, span_deg: f64) -> Mission {
        self.service
            .create_mission(NewMission {
                name: "square survey".to_string(),
                site_name: "test site".to_string(),
                coverage_area: Some(SurveyPolygon::from_outer_ring(vec![
                    [72.87, 19.07],
                    [72.87 + span_deg, 19.07],
                    [72.87 + span_deg, 19.07 + span_deg],
                    [72.87, 19.07 + span_deg],
                ])),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn wait_for_mission<F>(&self, mission_id: &str, max_secs: u64, pred: F) -> Mission
    where
        F: Fn(&Mission) -> bool,
    {
        for _ in 0..max_secs {
            let mission = self.repo.get_mission(mission_id).await.unwrap();
            if pred(&mission) {
                return mission;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("mission '{mission_id}' never reached the expected state");
    }

    async fn wait_for_drone_status(&self, drone_id: &str, max_secs: u64, status: DroneStatus) {
        for _ in 0..max_secs {
            let drone = self.repo.get_drone(drone_id).await.unwrap();
            if drone.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("drone '{drone_id}' never reached {status:?}");
    }
}

fn drain_events(sub: &mut Subscription) -> Vec<MissionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = sub.rx.try_recv() {
        events.push(event);
    }
    events
}

fn log_kinds(history: &[survey_core::models::HandoffLog]) -> Vec<HandoffKind> {
    history.iter().map(|l| l.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn happy_path_runs_all_phases_and_charges_the_drone() {
    let h = harness().await;
    let drone_id = h.add_drone(100.0, DroneStatus::Available).await;
    let mission = h.create_mission(0.001).await;

    let mut sub = h.service.bus().subscribe_with_capacity(&mission.mission_id, 4096);
    let started = h.service.start_mission(&mission.mission_id).await.unwrap();

    // Travel out, survey body, return home
    let path = started.flight_path.as_ref().unwrap();
    assert!(path.travel_prefix_len() >= 4);
    assert!(path.return_suffix_start() > path.travel_prefix_len());
    assert!(path.waypoints.len() - path.return_suffix_start() >= 3);
    assert_eq!(started.phase, MissionPhase::Traveling);

    let done = h
        .wait_for_mission(&mission.mission_id, 2_000, |m| {
            m.status == MissionStatus::Completed
        })
        .await;
    assert_eq!(done.progress_pct, 100.0);

    // Drone charges at base, then rejoins the pool
    h.wait_for_drone_status(&drone_id, 40, DroneStatus::Available).await;
    let drone = h.repo.get_drone(&drone_id).await.unwrap();
    assert_eq!(drone.battery_level, 100.0);
    assert!(drone.current_mission_id.is_none());

    // Phase events arrive in flight order
    let phases: Vec<MissionPhase> = drain_events(&mut sub)
        .into_iter()
        .filter_map(|e| match e {
            MissionEvent::PhaseChange { new_phase, .. } => Some(new_phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![MissionPhase::Surveying, MissionPhase::Returning]
    );

    let history = h.service.handoff_history(&mission.mission_id).await.unwrap();
    assert_eq!(
        log_kinds(&history),
        vec![HandoffKind::Start, HandoffKind::Complete]
    );
}

#[tokio::test(start_paused = true)]
async fn critical_battery_hands_off_to_replacement() {
    let h = harness().await;
    let low = h.add_drone(25.0, DroneStatus::Available).await;
    let fresh = h.add_drone(100.0, DroneStatus::Available).await;

    let mut mission = h.create_mission(0.004).await;
    mission.assigned_drone_id = Some(low.clone());
    h.repo.save_mission(&mission).await.unwrap();

    let mut sub = h.service.bus().subscribe_with_capacity(&mission.mission_id, 4096);
    h.service.start_mission(&mission.mission_id).await.unwrap();

    // 25% -> 20% at 2%/min is ~150s of flight, then the swap
    let swapped = h
        .wait_for_mission(&mission.mission_id, 400, |m| {
            m.assigned_drone_id.as_deref() == Some(fresh.as_str())
        })
        .await;
    assert!(swapped.pending_replacement_drone_id.is_none());
    assert!(swapped.handoff_location.is_none());

    // Outgoing drone flies home and charges back to full
    h.wait_for_drone_status(&low, 120, DroneStatus::Available).await;
    let outgoing = h.repo.get_drone(&low).await.unwrap();
    assert_eq!(outgoing.battery_level, 100.0);
    assert!(outgoing.current_mission_id.is_none());
    assert!(outgoing.returning_mission_id.is_none());

    // Mission finishes on the replacement without a second handoff
    let done = h
        .wait_for_mission(&mission.mission_id, 3_000, |m| {
            m.status == MissionStatus::Completed
        })
        .await;
    assert_eq!(done.assigned_drone_id.as_deref(), Some(fresh.as_str()));

    let events = drain_events(&mut sub);
    let dispatched = events.iter().any(|e| {
        matches!(e, MissionEvent::ReplacementDispatched { incoming_drone_id, .. }
            if incoming_drone_id == &fresh)
    });
    let completed_handoff = events.iter().any(|e| {
        matches!(e, MissionEvent::HandoffComplete { outgoing_drone_id, incoming_drone_id, .. }
            if outgoing_drone_id == &low && incoming_drone_id == &fresh)
    });
    assert!(dispatched, "expected a replacement_dispatched event");
    assert!(completed_handoff, "expected a handoff_complete event");

    let history = h.service.handoff_history(&mission.mission_id).await.unwrap();
    let spec_kinds: Vec<HandoffKind> = log_kinds(&history)
        .into_iter()
        .filter(|k| {
            matches!(
                k,
                HandoffKind::Start
                    | HandoffKind::ReplacementDispatched
                    | HandoffKind::HandoffComplete
                    | HandoffKind::Complete
            )
        })
        .collect();
    assert_eq!(
        spec_kinds,
        vec![
            HandoffKind::Start,
            HandoffKind::ReplacementDispatched,
            HandoffKind::HandoffComplete,
            HandoffKind::Complete,
        ]
    );
    assert!(log_kinds(&history).contains(&HandoffKind::ReturnToBase));
}

#[tokio::test(start_paused = true)]
async fn no_replacement_aborts_and_returns_the_drone() {
    let h = harness().await;
    let low = h.add_drone(25.0, DroneStatus::Available).await;
    h.add_drone(100.0, DroneStatus::Maintenance).await;

    let mission = h.create_mission(0.004).await;
    let mut sub = h.service.bus().subscribe_with_capacity(&mission.mission_id, 4096);
    h.service.start_mission(&mission.mission_id).await.unwrap();

    let aborted = h
        .wait_for_mission(&mission.mission_id, 400, |m| {
            m.status == MissionStatus::Aborted
        })
        .await;
    assert!(aborted
        .abort_reason
        .as_deref()
        .unwrap_or_default()
        .contains("No replacement available"));

    // returning -> charging -> available
    h.wait_for_drone_status(&low, 120, DroneStatus::Available).await;

    let events = drain_events(&mut sub);
    assert!(events.iter().any(|e| {
        matches!(e, MissionEvent::MissionAborted { drone_id, reason, .. }
            if drone_id == &low && reason.contains("No replacement available"))
    }));

    let history = h.service.handoff_history(&mission.mission_id).await.unwrap();
    assert!(log_kinds(&history).contains(&HandoffKind::MissionAborted));

    // The untouched maintenance drone stays untouched
    let spare = h.repo.get_drone("DRN-0002").await.unwrap();
    assert_eq!(spare.status, DroneStatus::Maintenance);
}

#[tokio::test(start_paused = true)]
async fn pause_stops_telemetry_and_resume_continues_from_progress() {
    let h = harness().await;
    h.add_drone(100.0, DroneStatus::Available).await;
    let mission = h.create_mission(0.002).await;

    let mut sub = h.service.bus().subscribe(&mission.mission_id);
    h.service.start_mission(&mission.mission_id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    h.service.pause_mission(&mission.mission_id).await.unwrap();

    // Let the tick already in flight land, then expect silence
    tokio::time::sleep(Duration::from_secs(2)).await;
    let before_pause = drain_events(&mut sub);
    let last_telemetry = before_pause
        .iter()
        .rev()
        .find_map(|e| match e {
            MissionEvent::Telemetry { waypoint_index, progress_pct, .. } => {
                Some((*waypoint_index, *progress_pct))
            }
            _ => None,
        })
        .expect("telemetry before the pause");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(
        drain_events(&mut sub).is_empty(),
        "no events while paused"
    );

    let paused = h.repo.get_mission(&mission.mission_id).await.unwrap();
    assert_eq!(paused.status, MissionStatus::Paused);

    h.service.resume_mission(&mission.mission_id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let after_resume = drain_events(&mut sub);
    let first_telemetry = after_resume
        .iter()
        .find_map(|e| match e {
            MissionEvent::Telemetry { waypoint_index, progress_pct, .. } => {
                Some((*waypoint_index, *progress_pct))
            }
            _ => None,
        })
        .expect("telemetry after the resume");

    assert!(first_telemetry.0 >= last_telemetry.0);
    assert!(first_telemetry.1 >= last_telemetry.1);
}

#[tokio::test(start_paused = true)]
async fn start_rejects_degenerate_polygons_and_wrong_states() {
    let h = harness().await;
    h.add_drone(100.0, DroneStatus::Available).await;

    // Two vertices cannot enclose a survey area
    let degenerate = h
        .service
        .create_mission(NewMission {
            name: "line".to_string(),
            coverage_area: Some(SurveyPolygon::from_outer_ring(vec![
                [72.87, 19.07],
                [72.88, 19.07],
            ])),
            ..Default::default()
        })
        .await
        .unwrap();
    let err = h.service.start_mission(&degenerate.mission_id).await.unwrap_err();
    assert!(matches!(err, survey_core::SurveyError::Validation(_)));

    // Starting twice is illegal
    let mission = h.create_mission(0.001).await;
    h.service.start_mission(&mission.mission_id).await.unwrap();
    let err = h.service.start_mission(&mission.mission_id).await.unwrap_err();
    assert!(matches!(err, survey_core::SurveyError::IllegalState(_)));

    // So is updating while running
    let err = h
        .service
        .update_mission(&mission.mission_id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, survey_core::SurveyError::IllegalState(_)));
}
