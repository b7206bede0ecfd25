//! Flight path generation for survey coverage patterns.
//!
//! All planners normalize polygon longitudes to [-180, 180] before doing
//! any geometry, so paths coming from map UIs with wrapped coordinates
//! (e.g. lng = -282) stay sane.

use crate::geo;
use crate::models::{FlightPath, PatternType, SurveyPolygon, Waypoint, WaypointAction};

/// Approximate camera ground swath as a fraction of altitude.
const SWATH_FACTOR: f64 = 0.8;
/// Floor for crosshatch line spacing in meters.
const MIN_LINE_SPACING_M: f64 = 10.0;
/// Cap on crosshatch scan lines.
const MAX_SCAN_LINES: usize = 50;
/// Spiral geometry.
const SPIRAL_TURNS: usize = 5;
const SPIRAL_POINTS_PER_TURN: usize = 12;
const SPIRAL_CENTER_HOVER_SECS: f64 = 3.0;
/// Travel paths add interior waypoints for hops longer than this.
const TRAVEL_HOP_THRESHOLD_M: f64 = 500.0;
const TRAVEL_HOP_SPACING_M: f64 = 200.0;
const MAX_TRAVEL_HOPS: usize = 10;
const TAKEOFF_ALTITUDE_M: f64 = 10.0;

/// Generate a flight path over a coverage polygon.
///
/// A polygon with fewer than 3 distinct vertices yields an empty waypoint
/// list; callers decide whether that is an error.
pub fn plan(
    polygon: &SurveyPolygon,
    pattern: PatternType,
    altitude_m: f64,
    overlap_pct: f64,
    speed_mps: f64,
) -> FlightPath {
    let polygon = polygon.normalized();

    let waypoints = if !polygon.has_enough_vertices() {
        Vec::new()
    } else {
        match pattern {
            PatternType::Perimeter => perimeter_waypoints(&polygon, altitude_m),
            PatternType::Crosshatch => crosshatch_waypoints(&polygon, altitude_m, overlap_pct),
            PatternType::Spiral => spiral_waypoints(&polygon, altitude_m),
            PatternType::Waypoint => vertex_waypoints(&polygon, altitude_m),
        }
    };

    let total_distance_m = path_distance(&waypoints);
    FlightPath {
        pattern,
        waypoints,
        total_distance_m,
        estimated_duration_secs: estimate_duration(total_distance_m, speed_mps),
    }
}

/// Waypoints from base (or any start) to a destination at cruise altitude:
/// low takeoff, climb, interior hops for long distances, arrival.
pub fn plan_travel(
    start_lng: f64,
    start_lat: f64,
    end_lng: f64,
    end_lat: f64,
    altitude_m: f64,
) -> Vec<Waypoint> {
    let mut waypoints = vec![
        Waypoint::new(start_lng, start_lat, TAKEOFF_ALTITUDE_M, WaypointAction::Fly),
        Waypoint::new(start_lng, start_lat, altitude_m, WaypointAction::Fly),
    ];

    let distance = geo::haversine_distance(start_lng, start_lat, end_lng, end_lat);
    if distance > TRAVEL_HOP_THRESHOLD_M {
        let hops = ((distance / TRAVEL_HOP_SPACING_M) as usize).min(MAX_TRAVEL_HOPS);
        let lng_diff = geo::shortest_lng_diff(start_lng, end_lng);
        for i in 1..hops {
            let ratio = i as f64 / (hops + 1) as f64;
            let lat = start_lat + ratio * (end_lat - start_lat);
            let lng = geo::normalize_longitude(start_lng + ratio * lng_diff);
            waypoints.push(Waypoint::new(lng, lat, altitude_m, WaypointAction::Fly));
        }
    }

    waypoints.push(Waypoint::new(end_lng, end_lat, altitude_m, WaypointAction::Fly));
    waypoints
}

/// Sum of Haversine hops over a waypoint list, in meters.
pub fn path_distance(waypoints: &[Waypoint]) -> f64 {
    waypoints
        .windows(2)
        .map(|pair| geo::haversine_distance(pair[0].lng, pair[0].lat, pair[1].lng, pair[1].lat))
        .sum()
}

/// Seconds to fly `distance_m` at `speed_mps`; 0 when speed is not positive.
pub fn estimate_duration(distance_m: f64, speed_mps: f64) -> f64 {
    if speed_mps > 0.0 {
        distance_m / speed_mps
    } else {
        0.0
    }
}

/// Every outer-ring vertex in order, photographing at each.
fn perimeter_waypoints(polygon: &SurveyPolygon, altitude_m: f64) -> Vec<Waypoint> {
    polygon
        .outer_ring()
        .iter()
        .map(|c| Waypoint::new(c[0], c[1], altitude_m, WaypointAction::Photo))
        .collect()
}

/// Outer-ring vertices minus the closing duplicate; fly to the first,
/// photograph at the rest.
fn vertex_waypoints(polygon: &SurveyPolygon, altitude_m: f64) -> Vec<Waypoint> {
    let ring = polygon.outer_ring();
    let mut len = ring.len();
    if len >= 2 && ring.first() == ring.last() {
        len -= 1;
    }
    ring[..len]
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let action = if i == 0 {
                WaypointAction::Fly
            } else {
                WaypointAction::Photo
            };
            Waypoint::new(c[0], c[1], altitude_m, action)
        })
        .collect()
}

/// Boustrophedon scan lines across the polygon interior.
///
/// Line spacing derives from the camera swath at the flight altitude and
/// the requested image overlap. Each scan latitude contributes entry/exit
/// waypoint pairs at the polygon-edge intersections, sweeping south to
/// north with alternating direction.
fn crosshatch_waypoints(polygon: &SurveyPolygon, altitude_m: f64, overlap_pct: f64) -> Vec<Waypoint> {
    let Some((_, min_lat, _, max_lat)) = polygon.bounds() else {
        return Vec::new();
    };

    let swath_m = altitude_m * SWATH_FACTOR;
    let spacing_m = (swath_m * (1.0 - overlap_pct / 100.0)).max(MIN_LINE_SPACING_M);
    let spacing_deg = spacing_m / geo::METERS_PER_DEG_LAT;

    let edges = ring_edges(polygon.outer_ring());
    let mut waypoints = Vec::new();
    let mut scan_lat = min_lat;
    let mut west_to_east = true;
    let mut lines = 0;

    while scan_lat <= max_lat && lines < MAX_SCAN_LINES {
        let mut intersections: Vec<f64> = edges
            .iter()
            .filter_map(|&([x1, y1], [x2, y2])| {
                let crosses = (y1 <= scan_lat && scan_lat <= y2) || (y2 <= scan_lat && scan_lat <= y1);
                if crosses && y1 != y2 {
                    Some(x1 + (scan_lat - y1) * (x2 - x1) / (y2 - y1))
                } else {
                    None
                }
            })
            .collect();
        intersections.sort_by(|a, b| a.total_cmp(b));

        // Pair sorted crossings into interior segments
        for pair in intersections.chunks_exact(2) {
            let (entry, exit) = if west_to_east {
                (pair[0], pair[1])
            } else {
                (pair[1], pair[0])
            };
            waypoints.push(Waypoint::new(entry, scan_lat, altitude_m, WaypointAction::Fly));
            waypoints.push(Waypoint::new(exit, scan_lat, altitude_m, WaypointAction::Photo));
        }

        scan_lat += spacing_deg;
        west_to_east = !west_to_east;
        lines += 1;
    }

    waypoints
}

/// Spiral from the outermost vertex radius in toward the centroid, ending
/// with a hover over the center.
fn spiral_waypoints(polygon: &SurveyPolygon, altitude_m: f64) -> Vec<Waypoint> {
    let Some((center_lat, center_lng)) = polygon.centroid() else {
        return Vec::new();
    };

    let max_radius_m = polygon
        .outer_ring()
        .iter()
        .map(|c| geo::haversine_distance(center_lng, center_lat, c[0], c[1]))
        .fold(0.0, f64::max);

    let total_points = SPIRAL_TURNS * SPIRAL_POINTS_PER_TURN;
    let mut waypoints = Vec::with_capacity(total_points + 1);

    for i in 0..total_points {
        let t = 1.0 - i as f64 / total_points as f64;
        let radius_m = max_radius_m * t;
        let angle = i as f64 * (2.0 * std::f64::consts::PI / SPIRAL_POINTS_PER_TURN as f64);

        let lng_offset =
            radius_m * angle.cos() / geo::METERS_PER_DEG_LAT / center_lat.to_radians().cos();
        let lat_offset = radius_m * angle.sin() / geo::METERS_PER_DEG_LAT;

        waypoints.push(Waypoint::new(
            geo::normalize_longitude(center_lng + lng_offset),
            center_lat + lat_offset,
            altitude_m,
            WaypointAction::Photo,
        ));
    }

    let mut center = Waypoint::new(center_lng, center_lat, altitude_m, WaypointAction::Hover);
    center.duration_secs = SPIRAL_CENTER_HOVER_SECS;
    waypoints.push(center);

    waypoints
}

/// Edges of the outer ring, closing it when the input ring is open.
fn ring_edges(ring: &[[f64; 2]]) -> Vec<([f64; 2], [f64; 2])> {
    if ring.len() < 2 {
        return Vec::new();
    }
    let mut edges: Vec<_> = ring.windows(2).map(|w| (w[0], w[1])).collect();
    if ring.first() != ring.last() {
        edges.push((*ring.last().unwrap(), *ring.first().unwrap()));
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> SurveyPolygon {
        SurveyPolygon::from_outer_ring(vec![
            [72.87, 19.07],
            [72.88, 19.07],
            [72.88, 19.08],
            [72.87, 19.08],
        ])
    }

    #[test]
    fn perimeter_emits_every_vertex() {
        let path = plan(&square(), PatternType::Perimeter, 50.0, 70.0, 10.0);
        assert_eq!(path.waypoints.len(), 4);
        assert!(path
            .waypoints
            .iter()
            .all(|wp| wp.action == WaypointAction::Photo));
        assert!(path.total_distance_m > 0.0);
    }

    #[test]
    fn vertex_pattern_skips_closing_duplicate() {
        let mut ring = square().outer_ring().to_vec();
        ring.push(ring[0]);
        let path = plan(
            &SurveyPolygon::from_outer_ring(ring),
            PatternType::Waypoint,
            50.0,
            70.0,
            10.0,
        );
        assert_eq!(path.waypoints.len(), 4);
        assert_eq!(path.waypoints[0].action, WaypointAction::Fly);
        assert!(path.waypoints[1..]
            .iter()
            .all(|wp| wp.action == WaypointAction::Photo));
    }

    #[test]
    fn crosshatch_alternates_entry_exit_within_bounds() {
        let path = plan(&square(), PatternType::Crosshatch, 50.0, 70.0, 10.0);
        assert!(!path.waypoints.is_empty());
        // Entry/exit pairs: even waypoints fly, odd photograph
        for (i, wp) in path.waypoints.iter().enumerate() {
            let expected = if i % 2 == 0 {
                WaypointAction::Fly
            } else {
                WaypointAction::Photo
            };
            assert_eq!(wp.action, expected, "waypoint {i}");
            assert!((72.87..=72.88).contains(&wp.lng));
            assert!((19.07..=19.08).contains(&wp.lat));
        }
        // 50m altitude, 70% overlap: 12m spacing over ~1.1km, capped at 50 lines
        assert!(path.waypoints.len() <= 2 * MAX_SCAN_LINES);
        assert!(path.waypoints.len() >= 2 * 40);
    }

    #[test]
    fn crosshatch_spacing_has_floor() {
        // 95% overlap at 50m altitude would be 2m spacing; the floor keeps it at 10m
        let path = plan(&square(), PatternType::Crosshatch, 50.0, 95.0, 10.0);
        let lats: Vec<f64> = path.waypoints.iter().map(|wp| wp.lat).collect();
        let mut distinct = lats.clone();
        distinct.dedup();
        for pair in distinct.windows(2) {
            let gap_m = (pair[1] - pair[0]).abs() * geo::METERS_PER_DEG_LAT;
            assert!(gap_m >= MIN_LINE_SPACING_M - 1e-6);
        }
    }

    #[test]
    fn spiral_ends_hovering_over_centroid() {
        let path = plan(&square(), PatternType::Spiral, 50.0, 70.0, 10.0);
        assert_eq!(
            path.waypoints.len(),
            SPIRAL_TURNS * SPIRAL_POINTS_PER_TURN + 1
        );
        let last = path.waypoints.last().unwrap();
        assert_eq!(last.action, WaypointAction::Hover);
        assert_eq!(last.duration_secs, SPIRAL_CENTER_HOVER_SECS);
        assert!((last.lng - 72.875).abs() < 1e-9);
        assert!((last.lat - 19.075).abs() < 1e-9);
    }

    #[test]
    fn degenerate_polygon_yields_empty_path() {
        let line = SurveyPolygon::from_outer_ring(vec![[72.87, 19.07], [72.88, 19.07]]);
        for pattern in [
            PatternType::Perimeter,
            PatternType::Crosshatch,
            PatternType::Spiral,
            PatternType::Waypoint,
        ] {
            let path = plan(&line, pattern, 50.0, 70.0, 10.0);
            assert!(path.waypoints.is_empty(), "{pattern:?}");
            assert_eq!(path.total_distance_m, 0.0);
        }
    }

    #[test]
    fn short_travel_hop_is_three_waypoints() {
        let wps = plan_travel(72.877, 19.076, 72.878, 19.076, 50.0);
        assert_eq!(wps.len(), 3);
        assert_eq!(wps[0].alt, TAKEOFF_ALTITUDE_M);
        assert_eq!(wps[1].alt, 50.0);
        assert!(wps.iter().all(|wp| wp.action == WaypointAction::Fly));
    }

    #[test]
    fn long_travel_hop_adds_interior_waypoints() {
        // ~2.2km hop
        let wps = plan_travel(72.877, 19.076, 72.877, 19.096, 50.0);
        assert!(wps.len() > 3);
        assert!(wps.len() <= 2 + MAX_TRAVEL_HOPS);
        let last = wps.last().unwrap();
        assert_eq!((last.lng, last.lat), (72.877, 19.096));
    }

    #[test]
    fn travel_across_antimeridian_stays_normalized() {
        let wps = plan_travel(179.9, 0.0, -179.9, 0.0, 50.0);
        for wp in &wps {
            assert!(wp.lng.abs() <= 180.0, "lng {} out of range", wp.lng);
        }
        // Total distance is the ~22km short way, not around the globe
        let dist = path_distance(&wps);
        assert!(dist < 50_000.0, "travel distance {dist} should be < 50km");
    }

    #[test]
    fn duration_zero_for_non_positive_speed() {
        assert_eq!(estimate_duration(1000.0, 0.0), 0.0);
        assert_eq!(estimate_duration(1000.0, -5.0), 0.0);
        assert_eq!(estimate_duration(1000.0, 10.0), 100.0);
    }
}
