//! Synthetic sensor histories shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seaguard_core::{CanonicalRecord, GeoPoint, Measurement, MeasurementEvent, Product};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
}

/// A drifting buoy reporting every `step_minutes`, with jittered kinematics
pub fn drifting_buoy(id: &str, reports: usize, step_minutes: i64, seed: u64) -> Vec<CanonicalRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut lat = 43.5;
    let mut lon = -69.8;
    (0..reports)
        .map(|i| {
            let speed: f64 = rng.gen_range(0.2..1.2);
            lat += 0.002 * speed;
            lon -= 0.003 * rng.gen_range(0.2..1.2);
            let when = epoch() + Duration::minutes(step_minutes * i as i64);
            let event = MeasurementEvent::located(id, when, GeoPoint::new(lat, lon));
            let mut measurements = vec![
                Measurement::observed(Product::BuoySpeed, speed),
                Measurement::observed(Product::WaterTemperature, 11.0 + rng.gen_range(-0.3..0.3)),
                Measurement::observed(Product::BatteryTemperature, 18.0 + (i % 24) as f64 * 0.2),
            ];
            if i % 3 != 0 {
                measurements.push(Measurement::observed(Product::WindSpeed, rng.gen_range(2.0..9.0)));
            }
            CanonicalRecord::new(event, measurements)
        })
        .collect()
}

/// Several buoys interleaved, some sharing report times
pub fn fleet(buoys: usize, reports: usize) -> Vec<CanonicalRecord> {
    (0..buoys)
        .flat_map(|b| drifting_buoy(&format!("buoy-{b}"), reports, 30, b as u64))
        .collect()
}
