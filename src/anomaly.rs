//! Anomaly detection over untrusted reader input: monotonic-counter checks
//! and attach-vs-verify location divergence.

/// Default ceiling for an unexplained forward counter jump.
pub const DEFAULT_COUNTER_MAX_JUMP: i64 = 10;

/// A reported read counter is anomalous when it went backward (evidence of
/// tag cloning or rollback) or jumped implausibly far forward.
///
/// Boundaries: `reported == expected` and `reported == expected + max_jump`
/// are both plausible; `reported == expected + max_jump + 1` is not.
pub fn counter_anomalous(expected: i64, reported: i64, max_jump: i64) -> bool {
    reported < expected || reported - expected > max_jump
}

/// Great-circle distance between two WGS84 coordinates in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Distance between attach and verify coordinates, when both are known.
/// Returns `None` if either side lacks coordinates; a missing fix is not an
/// anomaly.
pub fn location_divergence_km(
    attach_lat: Option<f64>,
    attach_lng: Option<f64>,
    verify_lat: Option<f64>,
    verify_lng: Option<f64>,
) -> Option<f64> {
    match (attach_lat, attach_lng, verify_lat, verify_lng) {
        (Some(alat), Some(alng), Some(vlat), Some(vlng)) => {
            Some(haversine_km(alat, alng, vlat, vlng))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
