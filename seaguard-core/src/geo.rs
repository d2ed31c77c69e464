//! Great-circle geometry
//!
//! Location forecasts are scored by the haversine distance between the
//! predicted and the true position, on a sphere of radius 6371 km.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both coordinates finite and inside the valid ranges
    pub fn is_valid(&self) -> bool {
        valid_latitude(self.lat) && valid_longitude(self.lon)
    }

    /// Distance to `other` in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Haversine distance in kilometres between two points given in degrees
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // rounding can push `a` a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

pub fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}

/// Map a 0..360 longitude, as used by gridded products, into -180..=180
pub fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 && lon < 360.0 {
        lon - 360.0
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_distance() {
        let d = haversine_km(2.0, 2.0, 0.0, 0.0);
        assert!((d - 314.47).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(41.5, -71.3);
        assert_eq!(p.distance_km(&p), 0.0);
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(290.0), -70.0);
        assert_eq!(wrap_longitude(-70.0), -70.0);
        assert_eq!(wrap_longitude(180.0), 180.0);
    }

    #[test]
    fn test_validity() {
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }

    proptest! {
        #[test]
        fn prop_haversine_symmetric_and_bounded(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let ab = haversine_km(lat1, lon1, lat2, lon2);
            let ba = haversine_km(lat2, lon2, lat1, lon1);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab >= 0.0);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        }
    }
}
