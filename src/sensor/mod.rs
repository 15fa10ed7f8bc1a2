//! Live Sensor Gateway
//!
//! Polls the hydrometer gateway (`GET /macid/all`) for the latest device
//! reading, trying each candidate base URL in order until one answers. A
//! fully unreachable gateway is a normal input (it feeds the signal-loss
//! check), never a process fault.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SensorConfig;
use crate::store::{schema, SeriesStore, WritePoint};
use crate::types::{GatewayStatus, LiveSensorState, TempUnit, Temperature};

const DEVICES_PATH: &str = "/macid/all";

/// Latest reading of one device as reported by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReading {
    pub gravity: Option<f64>,
    pub temperature: Option<Temperature>,
    pub rssi: Option<i32>,
    pub color: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no gateway configured")]
    NoEndpoints,

    #[error("all gateway endpoints failed: {}", .0.join("; "))]
    Unreachable(Vec<String>),
}

#[async_trait]
pub trait SensorGateway: Send + Sync {
    async fn poll(&self) -> Result<GatewayReading, GatewayError>;
}

// ============================================================================
// HTTP gateway
// ============================================================================

pub struct HttpGateway {
    http: reqwest::Client,
    base_urls: Vec<String>,
    default_unit: TempUnit,
}

impl HttpGateway {
    pub fn new(cfg: &SensorConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http,
            base_urls: cfg
                .gateway_urls
                .iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            default_unit: cfg.raw_temp_unit,
        })
    }

    async fn try_endpoint(&self, base: &str) -> Result<GatewayReading, String> {
        let url = format!("{base}{DEVICES_PATH}");
        let resp = self.http.get(&url).send().await.map_err(|e| format!("{url}: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("{url}: HTTP {}", resp.status()));
        }
        let body: Value = resp.json().await.map_err(|e| format!("{url}: {e}"))?;
        parse_devices(&body, self.default_unit).ok_or_else(|| format!("{url}: no devices"))
    }
}

#[async_trait]
impl SensorGateway for HttpGateway {
    async fn poll(&self) -> Result<GatewayReading, GatewayError> {
        if self.base_urls.is_empty() {
            return Err(GatewayError::NoEndpoints);
        }
        let mut failures = Vec::with_capacity(self.base_urls.len());
        for base in &self.base_urls {
            match self.try_endpoint(base).await {
                Ok(reading) => {
                    debug!(gateway = %base, "Gateway poll succeeded");
                    return Ok(reading);
                }
                Err(e) => failures.push(e),
            }
        }
        Err(GatewayError::Unreachable(failures))
    }
}

/// Parse the `{device_id: {...}}` document and take the first device.
///
/// Numeric fields may arrive as numbers or strings. `tempUnits` on the
/// device overrides the configured unit.
pub fn parse_devices(body: &Value, default_unit: TempUnit) -> Option<GatewayReading> {
    let device = body.as_object()?.values().next()?.as_object()?;

    let number = |key: &str| -> Option<f64> {
        let v = match device.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        v.filter(|v: &f64| v.is_finite())
    };

    let unit = device
        .get("tempUnits")
        .or_else(|| device.get("tempUnit"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<TempUnit>().ok())
        .unwrap_or(default_unit);

    Some(GatewayReading {
        gravity: number("SG"),
        temperature: number("Temp").map(|v| Temperature::new(v, unit)),
        rssi: number("RSSI").map(|v| v.round() as i32),
        color: device.get("Color").and_then(Value::as_str).map(str::to_string),
    })
}

// ============================================================================
// Simulated gateway
// ============================================================================

/// Gateway that replays the test-mode simulator, for `--demo` runs.
pub struct SimulatedGateway {
    sg_start: f64,
    temp_base_c: f64,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl SimulatedGateway {
    pub const fn new(sg_start: f64, temp_base_c: f64) -> Self {
        Self {
            sg_start,
            temp_base_c,
            clock: Mutex::new(None),
        }
    }

    /// Pin the simulated clock (tests); `None` follows wall-clock time.
    pub fn set_clock(&self, now: Option<DateTime<Utc>>) {
        if let Ok(mut clock) = self.clock.lock() {
            *clock = now;
        }
    }
}

#[async_trait]
impl SensorGateway for SimulatedGateway {
    async fn poll(&self) -> Result<GatewayReading, GatewayError> {
        let now = self.clock.lock().ok().and_then(|c| *c).unwrap_or_else(Utc::now);
        let sample = crate::ingest::simulator::synthesize(self.sg_start, self.temp_base_c, now);
        Ok(GatewayReading {
            gravity: Some(sample.gravity),
            temperature: Some(Temperature::celsius(sample.temperature_c)),
            rssi: Some(sample.rssi),
            color: Some(crate::ingest::simulator::TEST_COLOR.to_string()),
        })
    }
}

// ============================================================================
// Poll step
// ============================================================================

/// Poll once and derive the next live state.
///
/// On success the RSSI is also written to the health measurement; a failed
/// write is logged and does not affect the returned state.
pub async fn poll_once(
    gateway: &dyn SensorGateway,
    store: &dyn SeriesStore,
    health_measurement: &str,
    previous: &LiveSensorState,
    now: DateTime<Utc>,
) -> LiveSensorState {
    match gateway.poll().await {
        Ok(reading) => {
            if let Some(rssi) = reading.rssi {
                let point = WritePoint::new(health_measurement, now)
                    .tag(schema::TAG_COLOR, reading.color.as_deref().unwrap_or("Unknown"))
                    .field(schema::HEALTH_RSSI, i64::from(rssi));
                if let Err(e) = store.write(vec![point]).await {
                    warn!(error = %e, "Failed to record sensor health");
                }
            }
            LiveSensorState {
                last_seen: Some(now),
                gravity: reading.gravity,
                temperature: reading.temperature,
                rssi: reading.rssi,
                color: reading.color,
                status: GatewayStatus::Healthy,
                last_error: None,
            }
        }
        Err(e) => {
            debug!(error = %e, "Gateway poll failed");
            previous.unreachable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RangeQuery};
    use chrono::{Duration, TimeZone};

    struct DownGateway;

    #[async_trait]
    impl SensorGateway for DownGateway {
        async fn poll(&self) -> Result<GatewayReading, GatewayError> {
            Err(GatewayError::Unreachable(vec!["http://tiltpi:1880: refused".into()]))
        }
    }

    #[test]
    fn parses_first_device_with_string_numbers() {
        let body = serde_json::json!({
            "a4c1": {"SG": "1.045", "Temp": 68, "RSSI": "-71", "Color": "RED", "tempUnits": "F"}
        });
        let r = parse_devices(&body, TempUnit::Celsius).unwrap();
        assert_eq!(r.gravity, Some(1.045));
        assert_eq!(r.rssi, Some(-71));
        assert_eq!(r.color.as_deref(), Some("RED"));
        assert!((r.temperature.unwrap().to_celsius() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_document_has_no_reading() {
        assert!(parse_devices(&serde_json::json!({}), TempUnit::Celsius).is_none());
        assert!(parse_devices(&serde_json::json!([]), TempUnit::Celsius).is_none());
    }

    #[tokio::test]
    async fn healthy_poll_records_rssi() {
        let store = MemoryStore::new();
        let gw = SimulatedGateway::new(1.060, 20.0);
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 12, 30, 0).unwrap();
        gw.set_clock(Some(now));

        let state = poll_once(&gw, &store, "sensor_health", &LiveSensorState::default(), now).await;
        assert_eq!(state.status, GatewayStatus::Healthy);
        assert_eq!(state.last_seen, Some(now));

        let q = RangeQuery::new("sensor_health", Duration::hours(1), now);
        let tables = store.query(&q).await.unwrap();
        assert_eq!(tables.iter().map(|t| t.records.len()).sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn unreachable_keeps_last_good_reading() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 12, 30, 0).unwrap();
        let previous = LiveSensorState {
            last_seen: Some(now - Duration::minutes(1)),
            gravity: Some(1.030),
            status: GatewayStatus::Healthy,
            ..Default::default()
        };
        let state = poll_once(&DownGateway, &store, "sensor_health", &previous, now).await;
        assert_eq!(state.status, GatewayStatus::Unreachable);
        assert_eq!(state.gravity, Some(1.030));
        assert!(state.last_error.unwrap().contains("refused"));
    }
}
