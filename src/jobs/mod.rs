//! Monitor Jobs
//!
//! The four periodic jobs and the state they share.
//!
//! | Job | Default interval | Writes |
//! |---|---|---|
//! | `ingest` | 60 s | watermark, calibrated points, prediction |
//! | `alerts` | 300 s | anomaly report, cooldowns |
//! | `sensor_poll` | 15 s | live sensor state, RSSI history |
//! | `status` | 5 s | dashboard `status` events |
//!
//! Every slot of [`MonitorState`] has exactly one writer job; readers load
//! the current `Arc` snapshot.

use anyhow::Context;
use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::alerts::AlertPolicy;
use crate::anomaly::{AnomalyEngine, CheckContext};
use crate::config::{AnomalyConfig, BatchSettings, MonitorConfig, SettingsProvider};
use crate::ingest::Ingestor;
use crate::notify::{DashboardEvent, DashboardHub, Severity};
use crate::predictor::PredictionResult;
use crate::scheduler::{Job, JobSpec, Scheduler, SchedulerError};
use crate::sensor::{poll_once, SensorGateway};
use crate::store::SeriesStore;
use crate::types::{AnomalyReport, AnomalyStatus, Evaluation, LiveSensorState, TempUnit};

pub const INGEST_JOB: &str = "ingest";
pub const ALERT_JOB: &str = "alerts";
pub const SENSOR_POLL_JOB: &str = "sensor_poll";
pub const STATUS_JOB: &str = "status";

// ============================================================================
// Shared State
// ============================================================================

/// Latest outputs of each job.
pub struct MonitorState {
    pub live: ArcSwap<LiveSensorState>,
    pub settings: ArcSwap<BatchSettings>,
    pub report: ArcSwapOption<AnomalyReport>,
    pub prediction: ArcSwapOption<PredictionResult>,
    pub watermark: ArcSwapOption<DateTime<Utc>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            live: ArcSwap::from_pointee(LiveSensorState::default()),
            settings: ArcSwap::from_pointee(BatchSettings::default()),
            report: ArcSwapOption::empty(),
            prediction: ArcSwapOption::empty(),
            watermark: ArcSwapOption::empty(),
        }
    }
}

/// Dashboard view combining the live reading with the latest job outputs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub batch_name: Option<String>,
    pub test_mode: bool,
    pub live: LiveSensorState,
    /// Live gravity with the calibration offset applied
    pub gravity: Option<f64>,
    pub temperature_c: Option<f64>,
    pub abv: Option<f64>,
    pub anomaly_status: AnomalyStatus,
    pub anomaly_score: f64,
    pub predicted_fg: Option<f64>,
    pub days_remaining: Option<i64>,
    pub watermark: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let live = self.live.load_full();
        let settings = self.settings.load_full();
        let report = self.report.load_full();
        let prediction = self.prediction.load_full();

        let gravity = live.gravity.map(|g| g + settings.offset);
        StatusSnapshot {
            timestamp: now,
            batch_name: settings.batch_name.clone(),
            test_mode: settings.test_mode,
            live: (*live).clone(),
            gravity,
            temperature_c: live.temperature.map(|t| t.to_celsius()),
            abv: gravity
                .and_then(|g| settings.batch.abv_at(g))
                .map(|v| (v * 100.0).round() / 100.0),
            anomaly_status: report.as_ref().map_or(AnomalyStatus::Ok, |r| r.anomaly_status),
            anomaly_score: report.as_ref().map_or(0.0, |r| r.anomaly_score),
            predicted_fg: prediction.as_ref().map(|p| p.predicted_fg),
            days_remaining: prediction.as_ref().and_then(|p| p.days_remaining),
            watermark: self.watermark.load_full().map(|w| *w),
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

pub struct IngestionJob {
    ingestor: Mutex<Ingestor>,
    settings: Arc<dyn SettingsProvider>,
    state: Arc<MonitorState>,
}

impl IngestionJob {
    pub fn new(ingestor: Ingestor, settings: Arc<dyn SettingsProvider>, state: Arc<MonitorState>) -> Self {
        state.watermark.store(ingestor.watermark().get().map(Arc::new));
        Self {
            ingestor: Mutex::new(ingestor),
            settings,
            state,
        }
    }
}

#[async_trait]
impl Job for IngestionJob {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let settings = BatchSettings::load(self.settings.as_ref(), now).await;
        self.state.settings.store(Arc::new(settings.clone()));

        let report = self
            .ingestor
            .lock()
            .await
            .run_cycle(&settings, now)
            .await
            .context("ingestion cycle abandoned")?;

        self.state.watermark.store(report.watermark.map(Arc::new));
        if let Some(Evaluation::Ready(prediction)) = report.prediction {
            self.state.prediction.store(Some(Arc::new(prediction)));
        }
        debug!(
            simulated = report.simulated,
            raw = report.raw_samples,
            written = report.written,
            "Ingestion cycle complete"
        );
        Ok(())
    }
}

// ============================================================================
// Anomaly & Alerts
// ============================================================================

pub struct AlertJob {
    engine: AnomalyEngine,
    policy: AlertPolicy,
    store: Arc<dyn SeriesStore>,
    settings: Arc<dyn SettingsProvider>,
    state: Arc<MonitorState>,
    raw_measurement: String,
    raw_temp_unit: TempUnit,
    color: Option<String>,
    config: AnomalyConfig,
}

impl AlertJob {
    pub fn new(
        cfg: &MonitorConfig,
        policy: AlertPolicy,
        store: Arc<dyn SeriesStore>,
        settings: Arc<dyn SettingsProvider>,
        state: Arc<MonitorState>,
    ) -> Self {
        Self {
            engine: AnomalyEngine::from_config(&cfg.anomaly),
            policy,
            store,
            settings,
            state,
            raw_measurement: cfg.store.raw_measurement.clone(),
            raw_temp_unit: cfg.sensor.raw_temp_unit,
            color: cfg.sensor.color.clone(),
            config: cfg.anomaly.clone(),
        }
    }

    pub const fn policy(&self) -> &AlertPolicy {
        &self.policy
    }
}

#[async_trait]
impl Job for AlertJob {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let settings = BatchSettings::load(self.settings.as_ref(), now).await;
        if settings.test_mode {
            debug!("Test mode, anomaly checks skipped");
            return Ok(());
        }

        let live = self.state.live.load_full();
        let ctx = CheckContext {
            store: self.store.as_ref(),
            measurement: &self.raw_measurement,
            raw_temp_unit: self.raw_temp_unit,
            color: self.color.as_deref(),
            config: &self.config,
            settings: &settings,
            live: Some(live.as_ref()),
            now,
        };
        let local_time = now.with_timezone(&Local).time();
        let report = self.engine.run(&ctx, &self.policy, local_time).await;
        self.state.report.store(Some(Arc::new(report)));
        Ok(())
    }
}

// ============================================================================
// Live Sensor Poll
// ============================================================================

pub struct SensorPollJob {
    gateway: Arc<dyn SensorGateway>,
    store: Arc<dyn SeriesStore>,
    health_measurement: String,
    state: Arc<MonitorState>,
}

impl SensorPollJob {
    pub fn new(
        gateway: Arc<dyn SensorGateway>,
        store: Arc<dyn SeriesStore>,
        health_measurement: impl Into<String>,
        state: Arc<MonitorState>,
    ) -> Self {
        Self {
            gateway,
            store,
            health_measurement: health_measurement.into(),
            state,
        }
    }
}

#[async_trait]
impl Job for SensorPollJob {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let previous = self.state.live.load_full();
        let next = poll_once(
            self.gateway.as_ref(),
            self.store.as_ref(),
            &self.health_measurement,
            &previous,
            now,
        )
        .await;
        if next.status != previous.status {
            info!(from = ?previous.status, to = ?next.status, "Gateway status changed");
        }
        self.state.live.store(Arc::new(next));
        Ok(())
    }
}

// ============================================================================
// Status Broadcast
// ============================================================================

pub struct StatusBroadcastJob {
    hub: Arc<DashboardHub>,
    state: Arc<MonitorState>,
}

impl StatusBroadcastJob {
    pub const fn new(hub: Arc<DashboardHub>, state: Arc<MonitorState>) -> Self {
        Self { hub, state }
    }
}

#[async_trait]
impl Job for StatusBroadcastJob {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let snapshot = self.state.snapshot(now);
        let message = match (snapshot.gravity, snapshot.temperature_c) {
            (Some(g), Some(t)) => format!("SG {g:.3} at {t:.1}°C"),
            (Some(g), None) => format!("SG {g:.3}"),
            _ => "No live reading".to_string(),
        };
        let data = serde_json::to_value(&snapshot).context("status snapshot not serializable")?;
        self.hub
            .publish(DashboardEvent::new("status", message, Severity::Info, data, now));
        Ok(())
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Everything the jobs are wired to.
pub struct MonitorParts {
    pub store: Arc<dyn SeriesStore>,
    pub settings: Arc<dyn SettingsProvider>,
    pub gateway: Arc<dyn SensorGateway>,
    pub hub: Arc<DashboardHub>,
    pub policy: AlertPolicy,
    pub ingestor: Ingestor,
}

/// Register the monitor jobs on `scheduler` with the configured intervals.
pub fn register_jobs(
    scheduler: &mut Scheduler,
    cfg: &MonitorConfig,
    parts: MonitorParts,
    state: &Arc<MonitorState>,
) -> Result<(), SchedulerError> {
    let timeout = Duration::from_secs(cfg.scheduler.job_timeout_secs);
    let every = Duration::from_secs;

    scheduler.add(
        JobSpec::new(INGEST_JOB, "Calibrate readings and update prediction", every(cfg.scheduler.ingest_interval_secs), timeout),
        Arc::new(IngestionJob::new(parts.ingestor, Arc::clone(&parts.settings), Arc::clone(state))),
    )?;
    scheduler.add(
        JobSpec::new(ALERT_JOB, "Anomaly checks and alerts", every(cfg.scheduler.alert_interval_secs), timeout),
        Arc::new(AlertJob::new(
            cfg,
            parts.policy,
            Arc::clone(&parts.store),
            parts.settings,
            Arc::clone(state),
        )),
    )?;
    scheduler.add(
        JobSpec::new(SENSOR_POLL_JOB, "Poll live sensor gateway", every(cfg.scheduler.sensor_poll_interval_secs), timeout),
        Arc::new(SensorPollJob::new(
            parts.gateway,
            parts.store,
            cfg.store.health_measurement.clone(),
            Arc::clone(state),
        )),
    )?;
    if cfg.scheduler.status_broadcast {
        scheduler.add(
            JobSpec::new(STATUS_JOB, "Dashboard status broadcast", every(cfg.scheduler.status_interval_secs), timeout),
            Arc::new(StatusBroadcastJob::new(parts.hub, Arc::clone(state))),
        )?;
    }
    Ok(())
}
