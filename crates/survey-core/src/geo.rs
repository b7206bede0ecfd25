//! Geographic math for path planning and flight simulation.
//!
//! All functions are pure. NaN inputs propagate to the result; callers
//! guard at the boundary.

/// Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (constant at all latitudes).
pub const METERS_PER_DEG_LAT: f64 = 111_000.0;

/// Calculate distance between two points in meters using the Haversine formula.
///
/// # Arguments
/// * `lng1`, `lat1` - First point coordinates in decimal degrees
/// * `lng2`, `lat2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Great-circle distance in meters
pub fn haversine_distance(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing from point 1 to point 2.
///
/// Returns degrees normalized to [0, 360), 0 = north.
pub fn bearing(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lng2 - lng1).to_radians();

    let x = dlambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();

    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

/// Map a longitude to the [-180, 180] range.
pub fn normalize_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        return lng;
    }
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Signed shortest difference between two longitudes in [-180, 180].
///
/// `shortest_lng_diff(170.0, -170.0)` is `20.0`, not `-340.0`.
pub fn shortest_lng_diff(from_lng: f64, to_lng: f64) -> f64 {
    let diff = to_lng - from_lng;
    if diff.is_nan() {
        return diff;
    }
    let wrapped = (diff + 180.0).rem_euclid(360.0) - 180.0;
    // Keep the +180 representation so a half-world diff stays positive
    if wrapped == -180.0 && diff > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Linear interpolation between two (lng, lat) points with shortest-arc
/// longitude, handling antimeridian crossings. `fraction` in [0, 1].
pub fn interpolate_position(start: (f64, f64), end: (f64, f64), fraction: f64) -> (f64, f64) {
    let lng = normalize_longitude(start.0 + shortest_lng_diff(start.0, end.0) * fraction);
    let lat = start.1 + (end.1 - start.1) * fraction;
    (lng, lat)
}
