//! fermwatch: fermentation monitoring
//!
//! Calibrates hydrometer readings, predicts final gravity and completion from
//! a logistic fit, runs five anomaly checks and dispatches alerts under
//! cooldown and active-hours rules, all driven by a periodic job scheduler.
//!
//! ## Architecture
//!
//! - **Store** ([`store`]): the only seam to the time-series datastore
//! - **Ingestion** ([`ingest`]): watermark-driven calibration + prediction refresh
//! - **Predictor** ([`predictor`]): bounded four-parameter logistic fit
//! - **Anomaly** ([`anomaly`]): stall, runaway, temperature, signal, z-score
//! - **Alerts** ([`alerts`]) and **Notify** ([`notify`]): policy vs. delivery
//! - **Sensor** ([`sensor`]): live gateway poll
//! - **Scheduler** ([`scheduler`]) and **Jobs** ([`jobs`]): periodic execution
//! - **API** ([`api`]): scheduler introspection and status

pub mod alerts;
pub mod anomaly;
pub mod api;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod notify;
pub mod predictor;
pub mod scheduler;
pub mod sensor;
pub mod storage;
pub mod store;
pub mod types;

pub use alerts::{AlertKind, AlertOutcome, AlertPolicy, AlertRequest, CooldownTracker};
pub use anomaly::{AnomalyCheck, AnomalyEngine, CheckContext};
pub use config::{BatchSettings, MonitorConfig, SettingsProvider};
pub use ingest::{CycleReport, Ingestor};
pub use predictor::{PredictionResult, Predictor};
pub use scheduler::{Job, JobInfo, JobSpec, Scheduler};
pub use storage::{Watermark, WatermarkStore};
pub use store::{MemoryStore, SeriesStore};
pub use types::{AnomalyReport, AnomalyStatus, CheckName, CheckStatus, Evaluation};
