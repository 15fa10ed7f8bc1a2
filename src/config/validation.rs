//! Config validation: unknown-key detection with Levenshtein suggestions
//! and `[settings]` value checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::{BTreeMap, HashSet};

use super::settings::{keys, NUMERIC_SETTING_KEYS, SETTING_KEYS};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `MonitorConfig`.
///
/// Maintained by hand to match the struct hierarchy in monitor_config.rs.
/// `[settings]` entries are checked separately against [`SETTING_KEYS`].
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [store]
        "store",
        "store.url",
        "store.org",
        "store.bucket",
        "store.token",
        "store.timeout_secs",
        "store.raw_measurement",
        "store.calibrated_measurement",
        "store.prediction_measurement",
        "store.test_measurement",
        "store.health_measurement",
        "store.settings_measurement",
        // [sensor]
        "sensor",
        "sensor.gateway_urls",
        "sensor.timeout_secs",
        "sensor.raw_temp_unit",
        "sensor.color",
        // [scheduler]
        "scheduler",
        "scheduler.ingest_interval_secs",
        "scheduler.alert_interval_secs",
        "scheduler.sensor_poll_interval_secs",
        "scheduler.status_interval_secs",
        "scheduler.status_broadcast",
        "scheduler.job_timeout_secs",
        "scheduler.worker_threads",
        // [ingest]
        "ingest",
        "ingest.lookback_days",
        "ingest.min_points_for_prediction",
        // [anomaly]
        "anomaly",
        "anomaly.stall_window_hours",
        "anomaly.stall_min_points",
        "anomaly.stall_gravity_floor",
        "anomaly.stall_min_points_per_day",
        "anomaly.runaway_window_hours",
        "anomaly.runaway_drop_points",
        "anomaly.temp_window_minutes",
        "anomaly.temp_deviation_c",
        "anomaly.temp_target_c",
        "anomaly.signal_offline_hours",
        "anomaly.zscore_window_hours",
        "anomaly.zscore_threshold",
        "anomaly.zscore_min_points",
        "anomaly.zscore_std_floor",
        // [alerts]
        "alerts",
        "alerts.cooldown_temperature_hours",
        "alerts.cooldown_signal_hours",
        "alerts.cooldown_stall_hours",
        "alerts.cooldown_runaway_hours",
        "alerts.cooldown_statistical_hours",
        "alerts.telegram_token",
        "alerts.telegram_chat_id",
        "alerts.notifier_timeout_secs",
        // [server]
        "server",
        "server.addr",
        // [data]
        "data",
        "data.data_dir",
        // [settings]
        "settings",
    ];
    keys.iter().copied().collect()
}

/// Recursively collect dotted key paths from a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction<'a, I>(unknown: &str, known: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    known
        .into_iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(k, dist)| (*dist, *k))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        // [settings] is free-form at this level
        if key.starts_with("settings.") || known.contains(key.as_str()) {
            continue;
        }
        let suggestion = suggest_correction(&key, known.iter().copied());
        warnings.push(ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            field: key,
            suggestion,
        });
    }

    warnings
}

// ============================================================================
// Settings Table Validation
// ============================================================================

/// Validate the `[settings]` table.
///
/// Returns (errors, warnings). Unknown setting names are warnings; values
/// that can never be coerced into the typed settings are errors.
pub fn validate_settings_table(
    settings: &BTreeMap<String, toml::Value>,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (key, value) in settings {
        if !SETTING_KEYS.contains(&key.as_str()) {
            warnings.push(ValidationWarning {
                field: format!("settings.{key}"),
                message: format!("Unknown setting 'settings.{key}'"),
                suggestion: suggest_correction(key, SETTING_KEYS.iter().copied())
                    .map(|s| format!("settings.{s}")),
            });
            continue;
        }

        if NUMERIC_SETTING_KEYS.contains(&key.as_str()) {
            let numeric = match value {
                toml::Value::Float(f) => f.is_finite(),
                toml::Value::Integer(_) => true,
                toml::Value::String(s) => s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false),
                _ => false,
            };
            if !numeric {
                errors.push(format!("settings.{key} must be a finite number (got {value})"));
            }
        }

        if key == keys::TEST_MODE && !matches!(value, toml::Value::Boolean(_) | toml::Value::String(_)) {
            errors.push(format!("settings.{key} must be a boolean (got {value})"));
        }
    }

    (errors, warnings)
}
