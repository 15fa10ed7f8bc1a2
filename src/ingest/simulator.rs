//! Test-mode reading synthesizer.
//!
//! Gravity falls from `sg_start` by up to 40 points over each clock hour,
//! temperature and RSSI follow slow sine waves. With noise enabled, small
//! Gaussian jitter is added so the dashboard looks like a real sensor.

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::store::{schema, WritePoint};

/// Colour tag of simulated readings.
pub const TEST_COLOR: &str = "TEST";

/// Total simulated drop per hour, in gravity units.
const HOURLY_DROP: f64 = 0.040;

const GRAVITY_NOISE_SD: f64 = 0.0002;
const TEMP_NOISE_SD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSample {
    pub gravity: f64,
    pub temperature_c: f64,
    pub rssi: i32,
}

/// Deterministic reading for `now`.
pub fn synthesize(sg_start: f64, temp_base_c: f64, now: DateTime<Utc>) -> SyntheticSample {
    let progress = (f64::from(now.minute()) + f64::from(now.second()) / 60.0) / 60.0;
    let ts = now.timestamp() as f64;
    SyntheticSample {
        gravity: sg_start - HOURLY_DROP * progress,
        temperature_c: temp_base_c + (ts / 100.0).sin() * 0.5,
        rssi: -60 + ((ts / 50.0).sin() * 10.0) as i32,
    }
}

/// Add Gaussian jitter to gravity and temperature.
pub fn with_noise<R: Rng + ?Sized>(sample: SyntheticSample, rng: &mut R) -> SyntheticSample {
    let jitter = |sd: f64, rng: &mut R| Normal::new(0.0, sd).map_or(0.0, |n| n.sample(rng));
    SyntheticSample {
        gravity: sample.gravity + jitter(GRAVITY_NOISE_SD, rng),
        temperature_c: sample.temperature_c + jitter(TEMP_NOISE_SD, rng),
        rssi: sample.rssi,
    }
}

/// Point for the test measurement (`sg`, `temp`, `rssi`, tag `Color=TEST`).
pub fn test_point(measurement: &str, sample: SyntheticSample, now: DateTime<Utc>) -> WritePoint {
    WritePoint::new(measurement, now)
        .tag(schema::TAG_COLOR, TEST_COLOR)
        .field(schema::CAL_GRAVITY, sample.gravity)
        .field(schema::CAL_TEMP, sample.temperature_c)
        .field(schema::HEALTH_RSSI, i64::from(sample.rssi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gravity_falls_through_the_hour() {
        let top = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let half = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert!((synthesize(1.060, 20.0, top).gravity - 1.060).abs() < 1e-12);
        assert!((synthesize(1.060, 20.0, half).gravity - 1.040).abs() < 1e-12);
    }

    #[test]
    fn waves_stay_in_range() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 17, 42).unwrap();
        let s = synthesize(1.060, 20.0, t);
        assert!((19.5..=20.5).contains(&s.temperature_c));
        assert!((-70..=-50).contains(&s.rssi));
    }

    #[test]
    fn noise_is_small() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let base = synthesize(1.060, 20.0, t);
        let noisy = with_noise(base, &mut rng);
        assert!((noisy.gravity - base.gravity).abs() < 0.002);
        assert!((noisy.temperature_c - base.temperature_c).abs() < 0.5);
    }

    #[test]
    fn point_carries_test_tag() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let p = test_point("test_readings", synthesize(1.060, 20.0, t), t);
        assert_eq!(p.tags.get("Color").map(String::as_str), Some("TEST"));
        assert_eq!(p.fields.len(), 3);
    }
}
