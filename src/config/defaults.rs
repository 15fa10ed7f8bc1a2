//! System-wide default constants.
//!
//! Centralises the numbers used as config defaults and by the checks when no
//! override is configured. Grouped by subsystem for easy discovery.

// ============================================================================
// Ingestion & Prediction
// ============================================================================

/// How far back each ingestion cycle looks for raw samples (days).
pub const INGEST_LOOKBACK_DAYS: i64 = 21;

/// Minimum calibrated points in the lookback window before the predictor runs.
pub const MIN_POINTS_FOR_PREDICTION: usize = 50;

/// Physically plausible gravity band; anything outside is sensor garbage.
pub const GRAVITY_MIN: f64 = 0.900;
pub const GRAVITY_MAX: f64 = 1.200;

/// Median filter width applied before fitting (samples).
pub const MEDIAN_WINDOW: usize = 5;

/// Initial guess for the logistic rate parameter (1/hour).
pub const INITIAL_RATE_K: f64 = 0.5;

/// Function-evaluation cap for the bounded fit.
pub const FIT_MAX_EVALUATIONS: usize = 20_000;

/// Distance from the asymptote at which fermentation counts as complete.
pub const COMPLETION_EPSILON: f64 = 0.001;

// ============================================================================
// Anomaly Checks
// ============================================================================

/// Stall: look-back window (hours) and minimum hourly aggregates.
pub const STALL_WINDOW_HOURS: i64 = 24;
pub const STALL_MIN_POINTS: usize = 4;
/// Stall is only meaningful while gravity is still above this value.
pub const STALL_GRAVITY_FLOOR: f64 = 1.020;
/// Slope below which fermentation is considered stalled (gravity points/day).
pub const STALL_MIN_POINTS_PER_DAY: f64 = 1.0;

/// Runaway: window (hours) and drop threshold (gravity points).
pub const RUNAWAY_WINDOW_HOURS: i64 = 12;
pub const RUNAWAY_DROP_POINTS: f64 = 20.0;

/// Temperature: averaging window (minutes) and deviation band (°C, ≈ 2 °F).
pub const TEMP_WINDOW_MINUTES: i64 = 30;
pub const TEMP_DEVIATION_C: f64 = 1.1;

/// Hard temperature ceiling (°C) when no `temp_max` setting exists.
pub const TEMP_MAX_C: f64 = 28.0;

/// Signal loss: default timeout (minutes) and offline window (hours).
pub const SIGNAL_TIMEOUT_MIN: f64 = 60.0;
pub const SIGNAL_OFFLINE_HOURS: i64 = 24;

/// Statistical z-score check.
pub const ZSCORE_WINDOW_HOURS: i64 = 48;
pub const ZSCORE_THRESHOLD: f64 = 2.5;
pub const ZSCORE_MIN_POINTS: usize = 12;
/// Minimum standard deviation so flat baselines don't divide by zero.
pub const ZSCORE_STD_FLOOR: f64 = 0.1;

/// Score fraction of the threshold at which the report becomes `elevated`.
pub const ELEVATED_SCORE: f64 = 0.8;

// ============================================================================
// Alerting
// ============================================================================

pub const COOLDOWN_TEMPERATURE_HOURS: f64 = 4.0;
pub const COOLDOWN_SIGNAL_HOURS: f64 = 4.0;
pub const COOLDOWN_STALL_HOURS: f64 = 12.0;
pub const COOLDOWN_RUNAWAY_HOURS: f64 = 12.0;
pub const COOLDOWN_STATISTICAL_HOURS: f64 = 12.0;

pub const ALERT_START_TIME: &str = "08:00";
pub const ALERT_END_TIME: &str = "22:00";

// ============================================================================
// Scheduler
// ============================================================================

pub const INGEST_INTERVAL_SECS: u64 = 60;
pub const ALERT_INTERVAL_SECS: u64 = 300;
pub const SENSOR_POLL_INTERVAL_SECS: u64 = 15;
pub const STATUS_INTERVAL_SECS: u64 = 5;

/// Upper bound on one job run before it is abandoned (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 50;

// ============================================================================
// External I/O
// ============================================================================

/// Series store and notifier request timeout (seconds).
pub const STORE_TIMEOUT_SECS: u64 = 5;
pub const NOTIFIER_TIMEOUT_SECS: u64 = 5;

/// Per-URL timeout when polling the sensor gateway (seconds).
pub const GATEWAY_TIMEOUT_SECS: u64 = 3;

/// Lookback for the store-backed settings provider (days).
pub const SETTINGS_LOOKBACK_DAYS: i64 = 365;

/// Recent dashboard events kept for `/api/v2/events`.
pub const DASHBOARD_RING_CAPACITY: usize = 200;

// ============================================================================
// Test Mode
// ============================================================================

pub const TEST_SG_START: f64 = 1.060;
pub const TEST_TEMP_BASE_C: f64 = 20.0;
