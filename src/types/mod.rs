//! Shared data structures for the fermentation monitoring loop
//!
//! This module defines the core types passed between the pipeline stages:
//! - Readings: RawSample (sensor/gateway output), CalibratedPoint (ingestion output)
//! - Live state: LiveSensorState (fast gateway poll cache)
//! - Batch: BatchContext (externally supplied recipe/yeast metadata)
//! - Evaluation: the typed result returned by predictor and check calls
//! - Anomaly: per-check results and the aggregated AnomalyReport

mod reading;
mod batch;
mod evaluation;
mod anomaly;

pub use reading::*;
pub use batch::*;
pub use evaluation::*;
pub use anomaly::*;
