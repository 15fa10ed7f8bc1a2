//! Sensor readings: raw samples, calibrated points, unit-tagged temperature

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Temperature
// ============================================================================

/// Unit a temperature value was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TempUnit {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
}

impl std::fmt::Display for TempUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TempUnit::Celsius => write!(f, "C"),
            TempUnit::Fahrenheit => write!(f, "F"),
        }
    }
}

impl FromStr for TempUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" | "°c" => Ok(TempUnit::Celsius),
            "f" | "fahrenheit" | "°f" => Ok(TempUnit::Fahrenheit),
            other => Err(format!("unknown temperature unit '{other}'")),
        }
    }
}

/// A temperature value that always carries its unit.
///
/// Sensors report in whatever unit they are configured for; everything
/// downstream of ingestion works in Celsius via [`Temperature::to_celsius`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: f64,
    pub unit: TempUnit,
}

impl Temperature {
    pub const fn celsius(value: f64) -> Self {
        Self { value, unit: TempUnit::Celsius }
    }

    pub const fn fahrenheit(value: f64) -> Self {
        Self { value, unit: TempUnit::Fahrenheit }
    }

    pub const fn new(value: f64, unit: TempUnit) -> Self {
        Self { value, unit }
    }

    /// Value in degrees Celsius.
    pub fn to_celsius(self) -> f64 {
        match self.unit {
            TempUnit::Celsius => self.value,
            TempUnit::Fahrenheit => (self.value - 32.0) * 5.0 / 9.0,
        }
    }

    /// Value in degrees Fahrenheit.
    pub fn to_fahrenheit(self) -> f64 {
        match self.unit {
            TempUnit::Celsius => self.value * 9.0 / 5.0 + 32.0,
            TempUnit::Fahrenheit => self.value,
        }
    }
}

// ============================================================================
// Raw & Calibrated Readings
// ============================================================================

/// One record from the hydrometer gateway as stored in the series store.
///
/// Immutable once stored. Gravity and temperature are optional because the
/// store holds them as separate fields and either may be missing for a given
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub gravity: Option<f64>,
    pub temperature: Option<Temperature>,
    pub rssi: Option<i32>,
    /// Hydrometer colour tag (identifies the physical device)
    pub color: Option<String>,
}

/// Calibrated gravity point written by the ingestion stage.
///
/// `gravity = raw + offset`. Temperature, when the raw record carried one,
/// rides on the same point so both stay time-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPoint {
    pub timestamp: DateTime<Utc>,
    pub gravity: f64,
    pub temperature_c: Option<f64>,
    pub color: Option<String>,
    pub yeast_strain: String,
}

impl CalibratedPoint {
    /// Calibrate a raw sample. Returns `None` if the sample has no gravity.
    pub fn from_raw(sample: &RawSample, offset: f64, yeast_strain: &str) -> Option<Self> {
        let raw = sample.gravity?;
        Some(Self {
            timestamp: sample.timestamp,
            gravity: raw + offset,
            temperature_c: sample.temperature.map(Temperature::to_celsius),
            color: sample.color.clone(),
            yeast_strain: yeast_strain.to_string(),
        })
    }
}

// ============================================================================
// Live Sensor State
// ============================================================================

/// Result of the most recent gateway poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    /// No poll has completed yet
    #[default]
    Startup,
    /// Last poll returned a device reading
    Healthy,
    /// Every candidate endpoint failed on the last poll
    Unreachable,
}

/// In-memory cache of the latest reading seen directly on the gateway.
///
/// Written only by the sensor poll job; read by the status broadcast and the
/// signal-loss check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSensorState {
    pub last_seen: Option<DateTime<Utc>>,
    pub gravity: Option<f64>,
    pub temperature: Option<Temperature>,
    pub rssi: Option<i32>,
    pub color: Option<String>,
    pub status: GatewayStatus,
    pub last_error: Option<String>,
}

impl LiveSensorState {
    /// Copy of this state marked unreachable; the last good reading is kept.
    pub fn unreachable(&self, error: impl Into<String>) -> Self {
        Self {
            status: GatewayStatus::Unreachable,
            last_error: Some(error.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fahrenheit_converts_to_celsius() {
        let t = Temperature::fahrenheit(68.0);
        assert!((t.to_celsius() - 20.0).abs() < 1e-9);
        assert!((Temperature::celsius(20.0).to_fahrenheit() - 68.0).abs() < 1e-9);
    }

    #[test]
    fn unit_parses_common_spellings() {
        assert_eq!("F".parse::<TempUnit>().unwrap(), TempUnit::Fahrenheit);
        assert_eq!("celsius".parse::<TempUnit>().unwrap(), TempUnit::Celsius);
        assert!("kelvin".parse::<TempUnit>().is_err());
    }

    #[test]
    fn calibration_applies_offset_and_keeps_temperature() {
        let sample = RawSample {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            gravity: Some(1.048),
            temperature: Some(Temperature::fahrenheit(68.0)),
            rssi: Some(-70),
            color: Some("RED".into()),
        };
        let point = CalibratedPoint::from_raw(&sample, 0.002, "US-05").unwrap();
        assert!((point.gravity - 1.050).abs() < 1e-9);
        assert!((point.temperature_c.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(point.yeast_strain, "US-05");
        assert_eq!(point.color.as_deref(), Some("RED"));
    }

    #[test]
    fn sample_without_gravity_is_not_calibrated() {
        let sample = RawSample {
            timestamp: Utc::now(),
            gravity: None,
            temperature: Some(Temperature::celsius(19.0)),
            rssi: None,
            color: None,
        };
        assert!(CalibratedPoint::from_raw(&sample, 0.0, "Unknown").is_none());
    }
}
