//! User settings: the key/value provider and its typed per-cycle snapshot.
//!
//! The external settings surface stores values as strings. The core reads
//! them through [`SettingsProvider`] and coerces them ONCE per cycle into
//! [`BatchSettings`]; nothing downstream parses strings.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::defaults as d;
use crate::alerts::AlertWindow;
use crate::store::{RangeQuery, Reducer, SeriesStore, StoreError};
use crate::types::{BatchContext, TempUnit, Temperature};

/// Setting names understood by the core.
pub mod keys {
    pub const OFFSET: &str = "offset";
    pub const TEST_MODE: &str = "test_mode";
    pub const OG: &str = "og";
    pub const TARGET_FG: &str = "target_fg";
    pub const YEAST_STRAIN: &str = "yeast_strain";
    pub const YEAST_MIN_TEMP: &str = "yeast_min_temp";
    pub const YEAST_MAX_TEMP: &str = "yeast_max_temp";
    pub const YEAST_ATTENUATION: &str = "yeast_attenuation";
    pub const START_DATE: &str = "start_date";
    pub const TEMP_MAX: &str = "temp_max";
    /// Unit of the temperature settings above (`C` or `F`)
    pub const TEMP_UNIT: &str = "temp_unit";
    pub const TILT_TIMEOUT_MIN: &str = "tilt_timeout_min";
    pub const ALERT_START_TIME: &str = "alert_start_time";
    pub const ALERT_END_TIME: &str = "alert_end_time";
    pub const BATCH_NAME: &str = "batch_name";
    pub const TEST_SG_START: &str = "test_sg_start";
    pub const TEST_TEMP_BASE: &str = "test_temp_base";
}

pub const SETTING_KEYS: &[&str] = &[
    keys::OFFSET,
    keys::TEST_MODE,
    keys::OG,
    keys::TARGET_FG,
    keys::YEAST_STRAIN,
    keys::YEAST_MIN_TEMP,
    keys::YEAST_MAX_TEMP,
    keys::YEAST_ATTENUATION,
    keys::START_DATE,
    keys::TEMP_MAX,
    keys::TEMP_UNIT,
    keys::TILT_TIMEOUT_MIN,
    keys::ALERT_START_TIME,
    keys::ALERT_END_TIME,
    keys::BATCH_NAME,
    keys::TEST_SG_START,
    keys::TEST_TEMP_BASE,
];

/// Settings that must coerce to a number.
pub const NUMERIC_SETTING_KEYS: &[&str] = &[
    keys::OFFSET,
    keys::OG,
    keys::TARGET_FG,
    keys::YEAST_MIN_TEMP,
    keys::YEAST_MAX_TEMP,
    keys::TEMP_MAX,
    keys::TILT_TIMEOUT_MIN,
    keys::TEST_SG_START,
    keys::TEST_TEMP_BASE,
];

// ============================================================================
// Provider Trait
// ============================================================================

/// Read-only `get(key) -> string | null` view of user settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    /// Pull fresh values from the backing store, if there is one.
    async fn refresh(&self, _now: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Fixed settings, typically the `[settings]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Build from the TOML `[settings]` table; every value is stringified.
    pub fn from_toml(table: &BTreeMap<String, toml::Value>) -> Self {
        let values = table
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect();
        Self { values }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Settings read from the series store's settings measurement, newest value
/// per field, with a static fallback for keys never written.
pub struct StoreSettings {
    store: Arc<dyn SeriesStore>,
    measurement: String,
    fallback: StaticSettings,
    cache: ArcSwap<HashMap<String, String>>,
}

impl StoreSettings {
    pub fn new(store: Arc<dyn SeriesStore>, measurement: impl Into<String>, fallback: StaticSettings) -> Self {
        Self {
            store,
            measurement: measurement.into(),
            fallback,
            cache: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

#[async_trait]
impl SettingsProvider for StoreSettings {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.cache.load().get(key) {
            return Some(v.clone());
        }
        self.fallback.get(key).await
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let query = RangeQuery::new(&self.measurement, Duration::days(d::SETTINGS_LOOKBACK_DAYS), now)
            .reduce(Reducer::Last);
        let tables = self.store.query(&query).await?;

        let mut fresh: HashMap<String, String> = HashMap::new();
        let mut stamped: HashMap<String, DateTime<Utc>> = HashMap::new();
        for record in tables.iter().flat_map(|t| t.records.iter()) {
            if record.field.is_empty() {
                continue;
            }
            let newer = stamped.get(&record.field).map_or(true, |t| record.time >= *t);
            if newer {
                stamped.insert(record.field.clone(), record.time);
                fresh.insert(record.field.clone(), record.value.as_text());
            }
        }

        debug!(keys = fresh.len(), "Settings refreshed from store");
        self.cache.store(Arc::new(fresh));
        Ok(())
    }
}

// ============================================================================
// Typed Snapshot
// ============================================================================

/// All user settings the core consumes, coerced once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub offset: f64,
    pub test_mode: bool,
    pub batch: BatchContext,
    /// Hard temperature ceiling, °C
    pub temp_max_c: f64,
    pub tilt_timeout_min: f64,
    /// `None` when the configured window is unparsable (alerts fail open)
    pub alert_window: Option<AlertWindow>,
    pub batch_name: Option<String>,
    pub test_sg_start: f64,
    pub test_temp_base_c: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            offset: 0.0,
            test_mode: false,
            batch: BatchContext::default(),
            temp_max_c: d::TEMP_MAX_C,
            tilt_timeout_min: d::SIGNAL_TIMEOUT_MIN,
            alert_window: AlertWindow::parse(d::ALERT_START_TIME, d::ALERT_END_TIME),
            batch_name: None,
            test_sg_start: d::TEST_SG_START,
            test_temp_base_c: d::TEST_TEMP_BASE_C,
        }
    }
}

impl BatchSettings {
    /// Refresh the provider (failures are logged and the cached values used)
    /// and coerce every known key.
    pub async fn load(provider: &dyn SettingsProvider, now: DateTime<Utc>) -> Self {
        if let Err(e) = provider.refresh(now).await {
            warn!(error = %e, "Settings refresh failed, using cached values");
        }

        let mut raw: HashMap<&'static str, String> = HashMap::new();
        for &key in SETTING_KEYS {
            if let Some(v) = provider.get(key).await {
                raw.insert(key, v);
            }
        }
        Self::from_raw(&raw)
    }

    /// Coerce raw strings; bad values are logged and replaced by defaults.
    pub fn from_raw(raw: &HashMap<&'static str, String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| raw.get(key).map(|s| s.trim()).filter(|s| !s.is_empty());
        let number = |key: &str| -> Option<f64> {
            let s = text(key)?;
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    warn!(key, value = s, "Ignoring non-numeric setting");
                    None
                }
            }
        };

        let unit = text(keys::TEMP_UNIT)
            .and_then(|s| match s.parse::<TempUnit>() {
                Ok(u) => Some(u),
                Err(e) => {
                    warn!(error = %e, "Ignoring temp_unit setting");
                    None
                }
            })
            .unwrap_or(TempUnit::Celsius);
        let celsius = |key: &str| number(key).map(|v| Temperature::new(v, unit).to_celsius());

        let alert_window = match (text(keys::ALERT_START_TIME), text(keys::ALERT_END_TIME)) {
            (None, None) => defaults.alert_window,
            (start, end) => {
                let start = start.unwrap_or(d::ALERT_START_TIME);
                let end = end.unwrap_or(d::ALERT_END_TIME);
                let window = AlertWindow::parse(start, end);
                if window.is_none() {
                    warn!(start, end, "Unparsable alert window, alerts allowed at all hours");
                }
                window
            }
        };

        let batch = BatchContext {
            og: number(keys::OG),
            target_fg: number(keys::TARGET_FG),
            yeast_strain: text(keys::YEAST_STRAIN).map(str::to_string),
            yeast_min_temp_c: celsius(keys::YEAST_MIN_TEMP),
            yeast_max_temp_c: celsius(keys::YEAST_MAX_TEMP),
            yeast_attenuation: text(keys::YEAST_ATTENUATION).map(parse_attenuation),
            start_date: text(keys::START_DATE).and_then(parse_date),
        };

        Self {
            offset: number(keys::OFFSET).unwrap_or(defaults.offset),
            test_mode: text(keys::TEST_MODE).is_some_and(|s| {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
            }),
            batch,
            temp_max_c: celsius(keys::TEMP_MAX).unwrap_or(defaults.temp_max_c),
            tilt_timeout_min: number(keys::TILT_TIMEOUT_MIN)
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.tilt_timeout_min),
            alert_window,
            batch_name: text(keys::BATCH_NAME).map(str::to_string),
            test_sg_start: number(keys::TEST_SG_START).unwrap_or(defaults.test_sg_start),
            test_temp_base_c: celsius(keys::TEST_TEMP_BASE).unwrap_or(defaults.test_temp_base_c),
        }
    }
}

/// Attenuation (%) assumed when the setting is present but has no number in it.
const DEFAULT_ATTENUATION: f64 = 75.0;

/// Parse an attenuation string such as `"75"`, `"75%"` or `"70-80%"`.
///
/// Returns the mean of every number found, or 75 when there are none.
pub fn parse_attenuation(raw: &str) -> f64 {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = NUMBER.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").ok()) else {
        return DEFAULT_ATTENUATION;
    };

    let values: Vec<f64> = re
        .find_iter(raw)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if values.is_empty() {
        DEFAULT_ATTENUATION
    } else {
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        values.iter().sum::<f64>() / n
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WritePoint};
    use chrono::{NaiveTime, TimeZone};

    fn raw(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, (*v).to_string())).collect()
    }

    #[test]
    fn attenuation_formats() {
        assert!((parse_attenuation("75") - 75.0).abs() < 1e-9);
        assert!((parse_attenuation("78%") - 78.0).abs() < 1e-9);
        assert!((parse_attenuation("70-80%") - 75.0).abs() < 1e-9);
        assert!((parse_attenuation("73.5 %") - 73.5).abs() < 1e-9);
        assert!((parse_attenuation("") - 75.0).abs() < 1e-9);
        assert!((parse_attenuation("high") - 75.0).abs() < 1e-9);
    }

    #[test]
    fn coerces_typed_values() {
        let s = BatchSettings::from_raw(&raw(&[
            (keys::OFFSET, "0.002"),
            (keys::TEST_MODE, "True"),
            (keys::OG, "1.055"),
            (keys::YEAST_STRAIN, "US-05"),
            (keys::YEAST_ATTENUATION, "81%"),
            (keys::TILT_TIMEOUT_MIN, "45"),
            (keys::START_DATE, "2024-03-01"),
        ]));
        assert!((s.offset - 0.002).abs() < 1e-12);
        assert!(s.test_mode);
        assert_eq!(s.batch.og, Some(1.055));
        assert_eq!(s.batch.yeast_strain.as_deref(), Some("US-05"));
        assert_eq!(s.batch.yeast_attenuation, Some(81.0));
        assert!((s.tilt_timeout_min - 45.0).abs() < 1e-12);
        assert_eq!(s.batch.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn og_alone_leaves_expected_fg_unset() {
        let s = BatchSettings::from_raw(&raw(&[(keys::OG, "1.055")]));
        assert_eq!(s.batch.yeast_attenuation, None);
        assert_eq!(s.batch.expected_fg(), None);

        let s = BatchSettings::from_raw(&raw(&[(keys::OG, "1.055"), (keys::YEAST_ATTENUATION, "unknown")]));
        assert_eq!(s.batch.yeast_attenuation, Some(DEFAULT_ATTENUATION));
        assert!(s.batch.expected_fg().is_some());
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let s = BatchSettings::from_raw(&raw(&[(keys::OFFSET, "abc"), (keys::TILT_TIMEOUT_MIN, "-5")]));
        assert!(s.offset.abs() < f64::EPSILON);
        assert!((s.tilt_timeout_min - d::SIGNAL_TIMEOUT_MIN).abs() < f64::EPSILON);
        assert!(!s.test_mode);
    }

    #[test]
    fn fahrenheit_settings_convert_to_celsius() {
        let s = BatchSettings::from_raw(&raw(&[
            (keys::TEMP_UNIT, "F"),
            (keys::YEAST_MIN_TEMP, "64.4"),
            (keys::YEAST_MAX_TEMP, "71.6"),
            (keys::TEMP_MAX, "82.4"),
        ]));
        assert!((s.batch.yeast_min_temp_c.unwrap() - 18.0).abs() < 1e-9);
        assert!((s.batch.yeast_max_temp_c.unwrap() - 22.0).abs() < 1e-9);
        assert!((s.temp_max_c - 28.0).abs() < 1e-9);
    }

    #[test]
    fn alert_window_defaults_and_fails_open() {
        let s = BatchSettings::from_raw(&HashMap::new());
        let w = s.alert_window.unwrap();
        assert_eq!(w.start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let s = BatchSettings::from_raw(&raw(&[(keys::ALERT_START_TIME, "morning")]));
        assert!(s.alert_window.is_none());
    }

    #[tokio::test]
    async fn store_settings_prefer_newest_store_value() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        store
            .write(vec![
                WritePoint::new("app_config", now - Duration::days(3)).field("og", "1.060"),
                WritePoint::new("app_config", now - Duration::days(1)).field("og", "1.048"),
            ])
            .await
            .unwrap();

        let provider = StoreSettings::new(
            store.clone(),
            "app_config",
            StaticSettings::default().with("og", "1.070").with("offset", "0.001"),
        );
        assert_eq!(provider.get("og").await.as_deref(), Some("1.070"));

        let s = BatchSettings::load(&provider, now).await;
        assert_eq!(s.batch.og, Some(1.048));
        assert!((s.offset - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn store_refresh_failure_keeps_fallback() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let provider = StoreSettings::new(store, "app_config", StaticSettings::default().with("og", "1.050"));
        let s = BatchSettings::load(&provider, Utc::now()).await;
        assert_eq!(s.batch.og, Some(1.050));
    }
}
