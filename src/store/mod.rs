//! Series Store Adapter
//!
//! Abstracts a range + measurement + field + tag query over a time-series
//! datastore. Everything above this module speaks [`RangeQuery`] /
//! [`Table`] / [`WritePoint`] and never sees the wire format.
//!
//! ## Architecture
//!
//! - [`SeriesStore`]: async trait, the only seam to the datastore
//! - [`InfluxStore`]: InfluxDB v2 HTTP backend (Flux query, line-protocol write)
//! - [`MemoryStore`]: in-process backend for `--demo` mode and tests
//!
//! Queries are built with absolute time bounds so callers can inject `now`.

mod flux;
mod influx;
mod memory;

pub use flux::to_flux;
pub use influx::{parse_annotated_csv, to_line_protocol, InfluxStore};
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::FailureKind;

// ============================================================================
// Schema
// ============================================================================

/// Field and tag names shared with the gateway and the dashboard.
pub mod schema {
    /// Raw gateway sample fields
    pub const RAW_GRAVITY: &str = "SG";
    pub const RAW_TEMP: &str = "Temp";
    pub const RAW_RSSI: &str = "RSSI";
    /// Hydrometer colour tag, present on raw and calibrated points
    pub const TAG_COLOR: &str = "Color";

    /// Calibrated point fields
    pub const CAL_GRAVITY: &str = "sg";
    pub const CAL_TEMP: &str = "temp";
    pub const TAG_YEAST: &str = "yeast";

    /// Prediction point fields
    pub const PREDICTED_FG: &str = "predicted_fg";
    pub const DAYS_REMAINING: &str = "days_remaining";

    /// Sensor health
    pub const HEALTH_RSSI: &str = "rssi";
}

// ============================================================================
// Values & Records
// ============================================================================

/// A field value as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Str(s) => s.trim().parse().ok(),
            FieldValue::Bool(_) => None,
        }
    }

    /// Value rendered as a plain string (settings values are stored as text).
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Str(s) => s.clone(),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// One `(time, value, field, tags)` record of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub value: FieldValue,
    pub field: String,
    pub tags: BTreeMap<String, String>,
}

impl Record {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// A group of records sharing measurement, field and tag set, ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub records: Vec<Record>,
}

/// Flatten tables into one time-ordered record list.
pub fn flatten(tables: Vec<Table>) -> Vec<Record> {
    let mut records: Vec<Record> = tables.into_iter().flat_map(|t| t.records).collect();
    records.sort_by_key(|r| r.time);
    records
}

/// Time-ordered `(time, value)` pairs for one field, numeric values only.
pub fn series(tables: &[Table], field: &str) -> Vec<(DateTime<Utc>, f64)> {
    let mut out: Vec<(DateTime<Utc>, f64)> = tables
        .iter()
        .flat_map(|t| t.records.iter())
        .filter(|r| r.field == field)
        .filter_map(|r| r.value.as_f64().map(|v| (r.time, v)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    out.sort_by_key(|(t, _)| *t);
    out
}

// ============================================================================
// Queries
// ============================================================================

/// Reducer applied per table after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducer {
    #[default]
    None,
    First,
    Last,
    Count,
    /// `aggregateWindow(every, fn: mean, createEmpty: false)`
    WindowMean(Duration),
}

/// A range + measurement + field + tag filter with an optional reducer.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub measurement: String,
    /// Empty means every field
    pub fields: Vec<String>,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub reducer: Reducer,
}

impl RangeQuery {
    /// Query `measurement` over `[now - lookback, now]`.
    pub fn new(measurement: impl Into<String>, lookback: Duration, now: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
            start: now - lookback,
            // Flux ranges are stop-exclusive; include samples stamped exactly `now`
            stop: now + Duration::milliseconds(1),
            tags: BTreeMap::new(),
            reducer: Reducer::None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Restrict to one hydrometer when `color` is set.
    #[must_use]
    pub fn color(self, color: Option<&str>) -> Self {
        match color {
            Some(c) => self.tag(schema::TAG_COLOR, c),
            None => self,
        }
    }

    #[must_use]
    pub const fn reduce(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }

    /// Describes the window for log lines, e.g. `sensor_data[SG] -24h`.
    pub fn describe(&self) -> String {
        let hours = (self.stop - self.start).num_minutes() as f64 / 60.0;
        format!("{}[{}] -{:.1}h", self.measurement, self.fields.join(","), hours)
    }
}

/// A point to write.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl WritePoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Errors & Trait
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unparseable store response: {0}")]
    Parse(String),

    #[error("store not configured: {0}")]
    NotConfigured(String),

    #[error("store unavailable")]
    Unavailable,
}

impl StoreError {
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::NotConfigured(_) => FailureKind::Configuration,
            StoreError::Status { status: 401 | 403, .. } => FailureKind::Configuration,
            _ => FailureKind::TransientIo,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

/// Range query and batched write over a time-series datastore.
///
/// Reads are eventually consistent: a query right after a write may not
/// see it.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Table>, StoreError>;

    async fn write(&self, points: Vec<WritePoint>) -> Result<(), StoreError>;
}
