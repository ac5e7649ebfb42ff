//! Small geographic helpers shared by the domain tool sets.

use serde_json::Value;

/// Check a coordinate pair, returning a field-identifying message on failure.
pub(crate) fn validate_coords(lat: f64, lon: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude must be between -90 and 90, got {lat}"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude must be between -180 and 180, got {lon}"));
    }
    Ok(())
}

/// Great-circle distance in meters.
pub(crate) fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Round to two decimals, the precision used on the wire.
pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Read a float out of a JSON value that may be a number or a numeric string
/// (Nominatim serializes coordinates as strings).
pub(crate) fn json_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
