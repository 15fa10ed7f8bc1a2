//! Monitor Configuration - deployment settings as operator-tunable TOML values
//!
//! Every section implements `Default` with the built-in constants from
//! [`super::defaults`], so a missing file or a partial file behaves exactly
//! like the stock deployment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults as d;
use crate::types::TempUnit;

/// Environment variable that points at the config file.
pub const CONFIG_ENV_VAR: &str = "FERMWATCH_CONFIG";
/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fermwatch.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitor deployment.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$FERMWATCH_CONFIG` env var
/// 2. `./fermwatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time-series store connection and measurement names
    #[serde(default)]
    pub store: StoreConfig,

    /// Live sensor gateway polling
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Job cadences
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Ingestion window and prediction threshold
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Anomaly check thresholds and windows
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Alert cooldowns and notifier credentials
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Introspection HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Local state directory
    #[serde(default)]
    pub data: DataConfig,

    /// Initial values for the user settings provider (`offset`, `og`, ...)
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$FERMWATCH_CONFIG` environment variable
    /// 2. `./fermwatch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded monitor config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded monitor config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Toml(e) => ConfigError::Parse(path.to_path_buf(), e),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Two-pass: unknown keys are reported as warnings first, then the
    /// document is deserialized and validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(ConfigError::Toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate ranges and orderings.
    ///
    /// Rules:
    /// - Intervals and timeouts must be > 0
    /// - Thresholds must be finite and positive
    /// - Gateway URLs must be http(s)
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.scheduler;
        for (name, secs) in [
            ("scheduler.ingest_interval_secs", s.ingest_interval_secs),
            ("scheduler.alert_interval_secs", s.alert_interval_secs),
            ("scheduler.sensor_poll_interval_secs", s.sensor_poll_interval_secs),
            ("scheduler.status_interval_secs", s.status_interval_secs),
            ("scheduler.job_timeout_secs", s.job_timeout_secs),
            ("store.timeout_secs", self.store.timeout_secs),
            ("sensor.timeout_secs", self.sensor.timeout_secs),
            ("alerts.notifier_timeout_secs", self.alerts.notifier_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }
        if s.worker_threads == 0 {
            errors.push("scheduler.worker_threads must be > 0".to_string());
        }

        if self.ingest.lookback_days <= 0 {
            errors.push("ingest.lookback_days must be > 0".to_string());
        }
        if self.ingest.min_points_for_prediction < d::MEDIAN_WINDOW {
            errors.push(format!(
                "ingest.min_points_for_prediction ({}) must be >= {}",
                self.ingest.min_points_for_prediction,
                d::MEDIAN_WINDOW
            ));
        }

        let a = &self.anomaly;
        for (name, v) in [
            ("anomaly.stall_min_points_per_day", a.stall_min_points_per_day),
            ("anomaly.runaway_drop_points", a.runaway_drop_points),
            ("anomaly.temp_deviation_c", a.temp_deviation_c),
            ("anomaly.zscore_threshold", a.zscore_threshold),
            ("anomaly.zscore_std_floor", a.zscore_std_floor),
        ] {
            Self::check_positive(v, name, &mut errors);
        }
        if !(d::GRAVITY_MIN..=d::GRAVITY_MAX).contains(&a.stall_gravity_floor) {
            errors.push(format!(
                "anomaly.stall_gravity_floor = {:.3} is outside the gravity range ({:.3}-{:.3})",
                a.stall_gravity_floor,
                d::GRAVITY_MIN,
                d::GRAVITY_MAX
            ));
        }
        for (name, hours) in [
            ("anomaly.stall_window_hours", a.stall_window_hours),
            ("anomaly.runaway_window_hours", a.runaway_window_hours),
            ("anomaly.temp_window_minutes", a.temp_window_minutes),
            ("anomaly.signal_offline_hours", a.signal_offline_hours),
            ("anomaly.zscore_window_hours", a.zscore_window_hours),
        ] {
            if hours <= 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }
        if a.stall_min_points < 2 {
            errors.push("anomaly.stall_min_points must be >= 2".to_string());
        }
        if a.zscore_min_points < 3 {
            errors.push("anomaly.zscore_min_points must be >= 3".to_string());
        }

        let al = &self.alerts;
        for (name, v) in [
            ("alerts.cooldown_temperature_hours", al.cooldown_temperature_hours),
            ("alerts.cooldown_signal_hours", al.cooldown_signal_hours),
            ("alerts.cooldown_stall_hours", al.cooldown_stall_hours),
            ("alerts.cooldown_runaway_hours", al.cooldown_runaway_hours),
            ("alerts.cooldown_statistical_hours", al.cooldown_statistical_hours),
        ] {
            if !v.is_finite() || v < 0.0 {
                errors.push(format!("{name} must be a finite, non-negative number (got {v})"));
            }
        }

        for url in &self.sensor.gateway_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("sensor.gateway_urls entry '{url}' must start with http:// or https://"));
            }
        }
        if !(self.store.url.starts_with("http://") || self.store.url.starts_with("https://")) {
            errors.push(format!("store.url '{}' must start with http:// or https://", self.store.url));
        }
        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("server.addr '{}' is not a valid socket address", self.server.addr));
        }

        let (setting_errors, setting_warnings) = super::validation::validate_settings_table(&self.settings);
        errors.extend(setting_errors);
        for w in &setting_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !value.is_finite() {
            errors.push(format!("{name}: value must be finite (got {value})"));
        } else if value <= 0.0 {
            errors.push(format!("{name} must be > 0 (got {value})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),

    #[error("Config parse error: {0}")]
    Toml(toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Store
// ============================================================================

/// Time-series store connection and measurement names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    /// API token; falls back to `$INFLUX_TOKEN` when unset
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Raw gateway samples (`SG`, `Temp`, `RSSI` fields, `Color` tag)
    pub raw_measurement: String,
    /// Ingestion output (`sg`, `temp` fields, `Color` and `yeast` tags)
    pub calibrated_measurement: String,
    pub prediction_measurement: String,
    /// Simulator output in test mode
    pub test_measurement: String,
    pub health_measurement: String,
    /// User settings written by the external settings surface
    pub settings_measurement: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            org: "homebrew".to_string(),
            bucket: "fermentation".to_string(),
            token: None,
            timeout_secs: d::STORE_TIMEOUT_SECS,
            raw_measurement: "sensor_data".to_string(),
            calibrated_measurement: "calibrated_readings".to_string(),
            prediction_measurement: "predictions".to_string(),
            test_measurement: "test_readings".to_string(),
            health_measurement: "sensor_health".to_string(),
            settings_measurement: "app_config".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Token from config, then from the environment.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("INFLUX_TOKEN").ok().filter(|t| !t.is_empty()))
    }
}

// ============================================================================
// Sensor Gateway
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Candidate gateway base URLs, tried in order until one answers
    pub gateway_urls: Vec<String>,
    pub timeout_secs: u64,
    /// Unit the hydrometer reports temperature in
    pub raw_temp_unit: TempUnit,
    /// `Color` tag of the hydrometer to follow. Unset treats every device in
    /// the raw measurement as the one hydrometer in the fermenter.
    pub color: Option<String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gateway_urls: vec![
                "http://tiltpi:1880".to_string(),
                "http://localhost:1880".to_string(),
            ],
            timeout_secs: d::GATEWAY_TIMEOUT_SECS,
            raw_temp_unit: TempUnit::Fahrenheit,
            color: None,
        }
    }
}

impl SensorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub ingest_interval_secs: u64,
    pub alert_interval_secs: u64,
    pub sensor_poll_interval_secs: u64,
    pub status_interval_secs: u64,
    /// Register the fast dashboard status job
    pub status_broadcast: bool,
    pub job_timeout_secs: u64,
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: d::INGEST_INTERVAL_SECS,
            alert_interval_secs: d::ALERT_INTERVAL_SECS,
            sensor_poll_interval_secs: d::SENSOR_POLL_INTERVAL_SECS,
            status_interval_secs: d::STATUS_INTERVAL_SECS,
            status_broadcast: true,
            job_timeout_secs: d::JOB_TIMEOUT_SECS,
            worker_threads: 2,
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub lookback_days: i64,
    pub min_points_for_prediction: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lookback_days: d::INGEST_LOOKBACK_DAYS,
            min_points_for_prediction: d::MIN_POINTS_FOR_PREDICTION,
        }
    }
}

// ============================================================================
// Anomaly Checks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub stall_window_hours: i64,
    pub stall_min_points: usize,
    pub stall_gravity_floor: f64,
    pub stall_min_points_per_day: f64,

    pub runaway_window_hours: i64,
    pub runaway_drop_points: f64,

    pub temp_window_minutes: i64,
    pub temp_deviation_c: f64,
    /// Explicit target temperature; overrides the yeast band midpoint
    pub temp_target_c: Option<f64>,

    pub signal_offline_hours: i64,

    pub zscore_window_hours: i64,
    pub zscore_threshold: f64,
    pub zscore_min_points: usize,
    pub zscore_std_floor: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            stall_window_hours: d::STALL_WINDOW_HOURS,
            stall_min_points: d::STALL_MIN_POINTS,
            stall_gravity_floor: d::STALL_GRAVITY_FLOOR,
            stall_min_points_per_day: d::STALL_MIN_POINTS_PER_DAY,
            runaway_window_hours: d::RUNAWAY_WINDOW_HOURS,
            runaway_drop_points: d::RUNAWAY_DROP_POINTS,
            temp_window_minutes: d::TEMP_WINDOW_MINUTES,
            temp_deviation_c: d::TEMP_DEVIATION_C,
            temp_target_c: None,
            signal_offline_hours: d::SIGNAL_OFFLINE_HOURS,
            zscore_window_hours: d::ZSCORE_WINDOW_HOURS,
            zscore_threshold: d::ZSCORE_THRESHOLD,
            zscore_min_points: d::ZSCORE_MIN_POINTS,
            zscore_std_floor: d::ZSCORE_STD_FLOOR,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_temperature_hours: f64,
    /// Shared by signal-loss and offline alerts
    pub cooldown_signal_hours: f64,
    pub cooldown_stall_hours: f64,
    pub cooldown_runaway_hours: f64,
    pub cooldown_statistical_hours: f64,
    /// Telegram bot token; falls back to `$TELEGRAM_BOT_TOKEN`
    pub telegram_token: Option<String>,
    /// Telegram chat id; falls back to `$TELEGRAM_CHAT_ID`
    pub telegram_chat_id: Option<String>,
    pub notifier_timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_temperature_hours: d::COOLDOWN_TEMPERATURE_HOURS,
            cooldown_signal_hours: d::COOLDOWN_SIGNAL_HOURS,
            cooldown_stall_hours: d::COOLDOWN_STALL_HOURS,
            cooldown_runaway_hours: d::COOLDOWN_RUNAWAY_HOURS,
            cooldown_statistical_hours: d::COOLDOWN_STATISTICAL_HOURS,
            telegram_token: None,
            telegram_chat_id: None,
            notifier_timeout_secs: d::NOTIFIER_TIMEOUT_SECS,
        }
    }
}

impl AlertsConfig {
    pub fn resolved_telegram(&self) -> Option<(String, String)> {
        let token = self
            .telegram_token
            .clone()
            .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok())
            .filter(|t| !t.is_empty())?;
        let chat = self
            .telegram_chat_id
            .clone()
            .or_else(|| std::env::var("TELEGRAM_CHAT_ID").ok())
            .filter(|c| !c.is_empty())?;
        Some((token, chat))
    }
}

// ============================================================================
// Server & Data
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Holds the sled state database and the process lock file
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl DataConfig {
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        MonitorConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [anomaly]
            zscore_threshold = 3.0

            [settings]
            offset = 0.002
            yeast_strain = "US-05"
            "#,
        )
        .unwrap();
        assert!((config.anomaly.zscore_threshold - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.anomaly.stall_min_points, d::STALL_MIN_POINTS);
        assert_eq!(config.scheduler.ingest_interval_secs, 60);
        assert_eq!(config.sensor.raw_temp_unit, TempUnit::Fahrenheit);
        assert_eq!(config.settings.len(), 2);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [scheduler]
            alert_interval_secs = 0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("alert_interval_secs")));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn raw_unit_parses_from_letter() {
        let config = MonitorConfig::from_toml_str(
            r#"
            [sensor]
            raw_temp_unit = "C"
            "#,
        )
        .unwrap();
        assert_eq!(config.sensor.raw_temp_unit, TempUnit::Celsius);
    }

    #[test]
    fn bad_gateway_url_is_rejected() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [sensor]
            gateway_urls = ["tiltpi:1880"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("gateway_urls"));
    }
}
