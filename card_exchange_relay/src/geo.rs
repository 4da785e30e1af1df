// Great-circle distance between two reported locations.
//
// Spherical Earth with the WGS-84 equatorial radius. Altitude is ignored:
// two clients on different floors of the same building are 0 m apart.

use std::f64::consts::PI;

use card_exchange_protocol::Location;

/// Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

const DEG_TO_RAD: f64 = PI / 180.0;

/// Haversine distance in meters between `a` and `b`.
pub fn haversine_distance(a: &Location, b: &Location) -> f64 {
    let lat1 = a.latitude * DEG_TO_RAD;
    let lat2 = b.latitude * DEG_TO_RAD;
    let d_lat = (b.latitude - a.latitude) * DEG_TO_RAD;
    let d_lon = (b.longitude - a.longitude) * DEG_TO_RAD;

    // Rounding can push `h` just past 1 for near-antipodal points.
    let h = ((d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}
