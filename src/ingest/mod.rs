//! Calibration & Ingestion
//!
//! Turns raw gateway samples into calibrated, strain-tagged points exactly
//! once per sample, then refreshes the curve prediction.
//!
//! ## Cycle
//!
//! 1. Query the raw measurement over the lookback window (`SG`, `Temp`, `RSSI`)
//! 2. Pivot fields into [`RawSample`]s keyed by `(timestamp, Color)`
//! 3. `gravity = raw + offset`; temperature converted to °C on the same point
//! 4. Write only samples strictly newer than the [`Watermark`]
//! 5. After a successful write: advance and persist the watermark
//! 6. With enough calibrated points in the window, fit and write a prediction
//!
//! Any store failure abandons the cycle before the watermark moves; the next
//! scheduled run retries. In test mode the cycle writes one synthetic
//! reading instead.

pub mod simulator;

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{BatchSettings, MonitorConfig};
use crate::predictor::{PredictionResult, Predictor};
use crate::storage::{Watermark, WatermarkError, WatermarkStore};
use crate::store::{flatten, schema, FieldValue, RangeQuery, Reducer, SeriesStore, StoreError, WritePoint};
use crate::types::{CalibratedPoint, Evaluation, RawSample, TempUnit, Temperature};

const UNKNOWN_COLOR: &str = "Unknown";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),
}

/// Where the restored watermark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkSource {
    Persisted,
    /// Latest timestamp already in the calibrated measurement
    CalibratedSeries,
    Unset,
}

/// Summary of one ingestion cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// True when the cycle wrote a synthetic reading instead of calibrating
    pub simulated: bool,
    pub raw_samples: usize,
    pub written: usize,
    pub watermark: Option<DateTime<Utc>>,
    /// `None` when fewer calibrated points than the prediction minimum exist
    pub prediction: Option<Evaluation<PredictionResult>>,
}

#[derive(Debug, Clone)]
struct Measurements {
    raw: String,
    calibrated: String,
    prediction: String,
    test: String,
}

/// Owns the watermark; driven by the ingestion job.
pub struct Ingestor {
    store: Arc<dyn SeriesStore>,
    measurements: Measurements,
    raw_temp_unit: TempUnit,
    /// Hydrometer followed; `None` means a single device per fermenter
    color: Option<String>,
    lookback: Duration,
    min_points: usize,
    predictor: Predictor,
    watermark: Watermark,
    persistence: Option<WatermarkStore>,
    restored: bool,
}

impl Ingestor {
    pub fn new(store: Arc<dyn SeriesStore>, cfg: &MonitorConfig, persistence: Option<WatermarkStore>) -> Self {
        Self {
            store,
            measurements: Measurements {
                raw: cfg.store.raw_measurement.clone(),
                calibrated: cfg.store.calibrated_measurement.clone(),
                prediction: cfg.store.prediction_measurement.clone(),
                test: cfg.store.test_measurement.clone(),
            },
            raw_temp_unit: cfg.sensor.raw_temp_unit,
            color: cfg.sensor.color.clone(),
            lookback: Duration::days(cfg.ingest.lookback_days),
            min_points: cfg.ingest.min_points_for_prediction,
            predictor: Predictor::with_min_points(cfg.ingest.min_points_for_prediction),
            watermark: Watermark::default(),
            persistence,
            restored: false,
        }
    }

    pub const fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Restore the watermark after a restart.
    ///
    /// Order: persisted value, then the newest calibrated point in the
    /// lookback window, then unset (the whole window is processed). Until a
    /// restore succeeds, every cycle retries it before calibrating.
    pub async fn restore(&mut self, now: DateTime<Utc>) -> Result<WatermarkSource, IngestError> {
        let source = self.derive_watermark(now).await?;
        self.restored = true;
        Ok(source)
    }

    async fn derive_watermark(&mut self, now: DateTime<Utc>) -> Result<WatermarkSource, IngestError> {
        if let Some(store) = &self.persistence {
            match store.load() {
                Ok(Some(ts)) => {
                    self.watermark.advance(ts);
                    info!(watermark = %ts, "Watermark restored from state database");
                    return Ok(WatermarkSource::Persisted);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Persisted watermark unreadable, re-deriving"),
            }
        }

        let q = RangeQuery::new(&self.measurements.calibrated, self.lookback, now)
            .field(schema::CAL_GRAVITY)
            .color(self.color.as_deref())
            .reduce(Reducer::Last);
        let latest = flatten(self.store.query(&q).await?)
            .into_iter()
            .map(|r| r.time)
            .max();

        match latest {
            Some(ts) => {
                self.watermark.advance(ts);
                info!(watermark = %ts, "Watermark re-derived from calibrated series");
                Ok(WatermarkSource::CalibratedSeries)
            }
            None => {
                info!("No watermark, processing the full lookback window");
                Ok(WatermarkSource::Unset)
            }
        }
    }

    /// Run one cycle with the settings snapshot taken at its start.
    pub async fn run_cycle(
        &mut self,
        settings: &BatchSettings,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, IngestError> {
        if settings.test_mode {
            return self.simulate(settings, now).await;
        }
        if !self.restored {
            self.restore(now).await?;
        }

        let q = RangeQuery::new(&self.measurements.raw, self.lookback, now)
            .field(schema::RAW_GRAVITY)
            .field(schema::RAW_TEMP)
            .field(schema::RAW_RSSI)
            .color(self.color.as_deref());
        let tables = self.store.query(&q).await?;
        let samples = pivot_samples(tables, self.raw_temp_unit);
        debug!(window = %q.describe(), samples = samples.len(), "Raw samples loaded");

        let strain = settings.batch.strain_or_unknown();
        let calibrated: Vec<CalibratedPoint> = samples
            .iter()
            .filter_map(|s| CalibratedPoint::from_raw(s, settings.offset, strain))
            .collect();

        let fresh: Vec<&CalibratedPoint> = calibrated
            .iter()
            .filter(|p| self.watermark.admits(p.timestamp))
            .collect();

        let written = fresh.len();
        if let Some(max_ts) = fresh.iter().map(|p| p.timestamp).max() {
            let points = fresh.iter().map(|p| calibrated_point(&self.measurements.calibrated, p)).collect();
            self.store.write(points).await?;

            self.watermark.advance(max_ts);
            if let Some(store) = &self.persistence {
                if let Err(e) = store.save(self.watermark) {
                    warn!(error = %e, "Failed to persist watermark");
                }
            }
            info!(written, watermark = %max_ts, "Calibrated points written");
        }

        let prediction = if calibrated.len() >= self.min_points {
            let series: Vec<(DateTime<Utc>, f64)> =
                calibrated.iter().map(|p| (p.timestamp, p.gravity)).collect();
            let eval = self.predictor.predict(&series, &settings.batch, now);
            self.record_prediction(&eval, now).await;
            Some(eval)
        } else {
            None
        };

        Ok(CycleReport {
            simulated: false,
            raw_samples: samples.len(),
            written,
            watermark: self.watermark.get(),
            prediction,
        })
    }

    async fn record_prediction(&self, eval: &Evaluation<PredictionResult>, now: DateTime<Utc>) {
        match eval {
            Evaluation::Ready(p) => {
                let mut point = WritePoint::new(&self.measurements.prediction, now)
                    .field(schema::PREDICTED_FG, p.predicted_fg);
                if let Some(days) = p.days_remaining {
                    point = point.field(schema::DAYS_REMAINING, days);
                }
                if let Err(e) = self.store.write(vec![point]).await {
                    warn!(error = %e, "Failed to write prediction");
                } else {
                    info!(
                        predicted_fg = p.predicted_fg,
                        days_remaining = ?p.days_remaining,
                        completion = ?p.completion,
                        "Prediction updated"
                    );
                }
            }
            Evaluation::InsufficientData { reason } => debug!(%reason, "No prediction"),
            Evaluation::Failed { kind, detail } => {
                warn!(failure = %kind, %detail, "Prediction failed");
            }
        }
    }

    async fn simulate(
        &self,
        settings: &BatchSettings,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, IngestError> {
        let sample = simulator::synthesize(settings.test_sg_start, settings.test_temp_base_c, now);
        let sample = simulator::with_noise(sample, &mut rand::thread_rng());
        self.store
            .write(vec![simulator::test_point(&self.measurements.test, sample, now)])
            .await?;
        debug!(sg = sample.gravity, temp_c = sample.temperature_c, "Test reading written");
        Ok(CycleReport {
            simulated: true,
            raw_samples: 0,
            written: 1,
            watermark: self.watermark.get(),
            prediction: None,
        })
    }
}

/// Group raw field records into samples keyed by `(timestamp, Color)`.
pub fn pivot_samples(tables: Vec<crate::store::Table>, temp_unit: TempUnit) -> Vec<RawSample> {
    let mut grouped: BTreeMap<(DateTime<Utc>, Option<String>), RawSample> = BTreeMap::new();
    for record in flatten(tables) {
        let color = record.tag(schema::TAG_COLOR).map(str::to_string);
        let sample = grouped
            .entry((record.time, color.clone()))
            .or_insert_with(|| RawSample {
                timestamp: record.time,
                gravity: None,
                temperature: None,
                rssi: None,
                color,
            });
        let Some(v) = record.value.as_f64().filter(|v| v.is_finite()) else {
            continue;
        };
        match record.field.as_str() {
            schema::RAW_GRAVITY => sample.gravity = Some(v),
            schema::RAW_TEMP => sample.temperature = Some(Temperature::new(v, temp_unit)),
            schema::RAW_RSSI => sample.rssi = Some(v.round() as i32),
            _ => {}
        }
    }
    grouped.into_values().collect()
}

fn calibrated_point(measurement: &str, p: &CalibratedPoint) -> WritePoint {
    let mut point = WritePoint::new(measurement, p.timestamp)
        .tag(schema::TAG_COLOR, p.color.as_deref().unwrap_or(UNKNOWN_COLOR))
        .tag(schema::TAG_YEAST, p.yeast_strain.clone())
        .field(schema::CAL_GRAVITY, p.gravity);
    if let Some(t) = p.temperature_c {
        point.fields.insert(schema::CAL_TEMP.to_string(), FieldValue::Float(t));
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{series, MemoryStore};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    async fn seed_raw(store: &MemoryStore, minutes: std::ops::Range<i64>) {
        let points = minutes
            .map(|m| {
                WritePoint::new("sensor_data", t0() + Duration::minutes(m))
                    .tag("Color", "RED")
                    .field("SG", 1.050 - 0.0001 * m as f64)
                    .field("Temp", 68.0)
            })
            .collect();
        store.write(points).await.unwrap();
    }

    fn ingestor(store: Arc<MemoryStore>) -> Ingestor {
        Ingestor::new(store, &MonitorConfig::default(), None)
    }

    fn settings(offset: f64) -> BatchSettings {
        BatchSettings {
            offset,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn calibrates_with_offset_and_aligned_temperature() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let mut ing = ingestor(store.clone());

        let now = t0() + Duration::minutes(5);
        let report = ing.run_cycle(&settings(0.002), now).await.unwrap();
        assert_eq!(report.written, 3);
        assert_eq!(report.watermark, Some(t0() + Duration::minutes(2)));

        let q = RangeQuery::new("calibrated_readings", Duration::days(1), now);
        let tables = store.query(&q).await.unwrap();
        let sg = series(&tables, "sg");
        let temp = series(&tables, "temp");
        assert!((sg[0].1 - 1.052).abs() < 1e-12);
        assert_eq!(temp.len(), 3);
        assert!((temp[0].1 - 20.0).abs() < 1e-9);
        assert_eq!(tables[0].records[0].tag("yeast"), Some("Unknown"));
    }

    #[tokio::test]
    async fn second_cycle_writes_only_new_samples() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let mut ing = ingestor(store.clone());
        let now = t0() + Duration::minutes(5);
        ing.run_cycle(&settings(0.0), now).await.unwrap();

        let again = ing.run_cycle(&settings(0.0), now).await.unwrap();
        assert_eq!(again.written, 0);

        seed_raw(&store, 3..5).await;
        let later = ing.run_cycle(&settings(0.0), now + Duration::minutes(1)).await.unwrap();
        assert_eq!(later.written, 2);
        assert_eq!(store.count("calibrated_readings").await, 5 * 2);
    }

    #[tokio::test]
    async fn configured_color_ignores_other_hydrometers() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let other = (0..4)
            .map(|m| {
                WritePoint::new("sensor_data", t0() + Duration::minutes(m) + Duration::seconds(30))
                    .tag("Color", "GREEN")
                    .field("SG", 1.080)
            })
            .collect();
        store.write(other).await.unwrap();

        let mut cfg = MonitorConfig::default();
        cfg.sensor.color = Some("RED".to_string());
        let mut ing = Ingestor::new(store.clone(), &cfg, None);
        let now = t0() + Duration::minutes(5);
        let report = ing.run_cycle(&settings(0.0), now).await.unwrap();
        assert_eq!(report.raw_samples, 3);
        assert_eq!(report.written, 3);
        assert_eq!(report.watermark, Some(t0() + Duration::minutes(2)));

        let q = RangeQuery::new("calibrated_readings", Duration::days(1), now).field("sg");
        let sg = series(&store.query(&q).await.unwrap(), "sg");
        assert!(sg.iter().all(|(_, g)| *g < 1.060));
    }

    #[tokio::test]
    async fn failed_write_does_not_advance_watermark() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let mut ing = ingestor(store.clone());

        store.set_unavailable(true);
        let now = t0() + Duration::minutes(5);
        assert!(ing.run_cycle(&settings(0.0), now).await.is_err());
        assert_eq!(ing.watermark().get(), None);

        store.set_unavailable(false);
        let report = ing.run_cycle(&settings(0.0), now).await.unwrap();
        assert_eq!(report.written, 3);
    }

    #[tokio::test]
    async fn unreachable_store_at_startup_defers_restore() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let now = t0() + Duration::minutes(5);
        ingestor(store.clone()).run_cycle(&settings(0.0), now).await.unwrap();

        let mut restarted = ingestor(store.clone());
        store.set_unavailable(true);
        assert!(restarted.restore(now).await.is_err());
        store.set_unavailable(false);

        // the first cycle re-derives the watermark before writing anything
        let report = restarted.run_cycle(&settings(0.0), now).await.unwrap();
        assert_eq!(report.written, 0);
    }

    #[tokio::test]
    async fn restore_prefers_calibrated_series_without_persistence() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let now = t0() + Duration::minutes(5);
        ingestor(store.clone()).run_cycle(&settings(0.0), now).await.unwrap();

        let mut restarted = ingestor(store.clone());
        let source = restarted.restore(now).await.unwrap();
        assert_eq!(source, WatermarkSource::CalibratedSeries);
        assert_eq!(restarted.watermark().get(), Some(t0() + Duration::minutes(2)));
        assert_eq!(restarted.run_cycle(&settings(0.0), now).await.unwrap().written, 0);
    }

    #[tokio::test]
    async fn test_mode_writes_synthetic_reading_only() {
        let store = Arc::new(MemoryStore::new());
        seed_raw(&store, 0..3).await;
        let mut ing = ingestor(store.clone());
        let s = BatchSettings {
            test_mode: true,
            ..Default::default()
        };
        let report = ing.run_cycle(&s, t0() + Duration::minutes(5)).await.unwrap();
        assert!(report.simulated);
        assert_eq!(store.count("test_readings").await, 3);
        assert_eq!(store.count("calibrated_readings").await, 0);
    }

    #[test]
    fn pivot_joins_fields_by_time_and_color() {
        let rec = |field: &str, v: f64, color: &str| crate::store::Record {
            time: t0(),
            value: FieldValue::Float(v),
            field: field.to_string(),
            tags: BTreeMap::from([("Color".to_string(), color.to_string())]),
        };
        let tables = vec![crate::store::Table {
            records: vec![rec("SG", 1.04, "RED"), rec("Temp", 68.0, "RED"), rec("SG", 1.03, "BLUE")],
        }];
        let samples = pivot_samples(tables, TempUnit::Fahrenheit);
        assert_eq!(samples.len(), 2);
        let red = samples.iter().find(|s| s.color.as_deref() == Some("RED")).unwrap();
        assert_eq!(red.gravity, Some(1.04));
        assert!(red.temperature.is_some());
    }
}
