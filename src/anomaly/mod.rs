//! Anomaly Detection Engine
//!
//! Five independent checks over short recent windows of the raw sensor
//! series, plus an aggregator that folds them into one score and status.
//!
//! ## Architecture
//!
//! - [`AnomalyCheck`]: async trait, one implementation per check. Each
//!   check has a pure `evaluate` function (unit-tested on synthetic series)
//!   and a thin `run` that queries the store and builds an [`AlertRequest`].
//! - [`AnomalyEngine`]: runs every check concurrently, converts store
//!   failures into `error` results, routes alert requests through the
//!   [`AlertPolicy`] and aggregates.
//!
//! | Check         | Window             | Trigger                                  |
//! |---------------|--------------------|------------------------------------------|
//! | stall         | 24h hourly mean    | gravity > 1.020 and < 1.0 points/day     |
//! | runaway       | 12h first vs last  | drop > 20 points                         |
//! | temperature   | 30min mean         | outside target ± 1.1 °C, or above ceiling|
//! | signal        | last sample (24h)  | silence > timeout; none at all = offline |
//! | statistical   | 48h hourly means   | max(|z_temp|, |z_rate|) > 2.5            |

pub mod runaway;
pub mod signal;
pub mod stall;
pub mod temperature;
pub mod zscore;

pub use runaway::RunawayCheck;
pub use signal::SignalCheck;
pub use stall::StallCheck;
pub use temperature::TemperatureCheck;
pub use zscore::ZScoreCheck;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::alerts::{AlertOutcome, AlertPolicy, AlertRequest};
use crate::config::{AnomalyConfig, BatchSettings};
use crate::store::{schema, series, RangeQuery, Reducer, SeriesStore, StoreError};
use crate::types::{
    AnomalyCheckResult, AnomalyReport, AnomalyStatus, CheckName, LiveSensorState, TempUnit,
    Temperature,
};

const DEFAULT_BATCH_NAME: &str = "Current Batch";

// ============================================================================
// Check Context
// ============================================================================

/// Everything a check may read. Borrowed for the duration of one pass.
pub struct CheckContext<'a> {
    pub store: &'a dyn SeriesStore,
    /// Raw gateway measurement (`SG`, `Temp` fields)
    pub measurement: &'a str,
    /// Unit of the raw `Temp` field
    pub raw_temp_unit: TempUnit,
    /// Hydrometer `Color` tag to restrict queries to, if configured
    pub color: Option<&'a str>,
    pub config: &'a AnomalyConfig,
    pub settings: &'a BatchSettings,
    /// Latest live gateway poll, if the poll job has run
    pub live: Option<&'a LiveSensorState>,
    pub now: DateTime<Utc>,
}

impl CheckContext<'_> {
    pub fn batch_name(&self) -> &str {
        self.settings
            .batch_name
            .as_deref()
            .unwrap_or(DEFAULT_BATCH_NAME)
    }

    fn query(&self, field: &str, lookback: Duration, reducer: Reducer) -> RangeQuery {
        RangeQuery::new(self.measurement, lookback, self.now)
            .field(field)
            .color(self.color)
            .reduce(reducer)
    }

    /// Gravity series with the calibration offset applied.
    pub async fn gravity(
        &self,
        lookback: Duration,
        reducer: Reducer,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        let q = self.query(schema::RAW_GRAVITY, lookback, reducer);
        let tables = self.store.query(&q).await?;
        debug!(window = %q.describe(), tables = tables.len(), "Queried gravity");
        let offset = self.settings.offset;
        Ok(series(&tables, schema::RAW_GRAVITY)
            .into_iter()
            .map(|(t, g)| (t, g + offset))
            .collect())
    }

    /// Temperature series converted to °C.
    pub async fn temperature_c(
        &self,
        lookback: Duration,
        reducer: Reducer,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StoreError> {
        let q = self.query(schema::RAW_TEMP, lookback, reducer);
        let tables = self.store.query(&q).await?;
        debug!(window = %q.describe(), tables = tables.len(), "Queried temperature");
        let unit = self.raw_temp_unit;
        Ok(series(&tables, schema::RAW_TEMP)
            .into_iter()
            .map(|(t, v)| (t, Temperature::new(v, unit).to_celsius()))
            .collect())
    }
}

// ============================================================================
// Check Trait
// ============================================================================

/// Result of one check plus the notification it wants sent, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub result: AnomalyCheckResult,
    pub alert: Option<AlertRequest>,
}

impl CheckOutcome {
    pub const fn quiet(result: AnomalyCheckResult) -> Self {
        Self { result, alert: None }
    }

    pub const fn alerting(result: AnomalyCheckResult, alert: AlertRequest) -> Self {
        Self {
            result,
            alert: Some(alert),
        }
    }
}

#[async_trait]
pub trait AnomalyCheck: Send + Sync {
    fn name(&self) -> CheckName;

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError>;
}

/// The five production checks.
pub fn default_checks() -> Vec<Box<dyn AnomalyCheck>> {
    vec![
        Box::new(StallCheck),
        Box::new(RunawayCheck),
        Box::new(TemperatureCheck),
        Box::new(SignalCheck),
        Box::new(ZScoreCheck),
    ]
}

// ============================================================================
// Engine
// ============================================================================

pub struct AnomalyEngine {
    checks: Vec<Box<dyn AnomalyCheck>>,
    zscore_threshold: f64,
}

impl AnomalyEngine {
    pub fn new(checks: Vec<Box<dyn AnomalyCheck>>, zscore_threshold: f64) -> Self {
        Self {
            checks,
            zscore_threshold,
        }
    }

    pub fn from_config(cfg: &AnomalyConfig) -> Self {
        Self::new(default_checks(), cfg.zscore_threshold)
    }

    /// Run every check concurrently. A failing check yields an `error`
    /// result and never affects the others.
    pub async fn evaluate(&self, ctx: &CheckContext<'_>) -> Vec<(CheckName, CheckOutcome)> {
        let runs = self.checks.iter().map(|check| async move {
            let name = check.name();
            let outcome = match check.run(ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        check = %name,
                        error = %e,
                        failure = %e.failure_kind(),
                        "Anomaly check failed"
                    );
                    CheckOutcome::quiet(AnomalyCheckResult::error(e.to_string()))
                }
            };
            (name, outcome)
        });
        join_all(runs).await
    }

    /// Evaluate, dispatch alert requests through `policy`, aggregate.
    pub async fn run(
        &self,
        ctx: &CheckContext<'_>,
        policy: &AlertPolicy,
        local_time: NaiveTime,
    ) -> AnomalyReport {
        let outcomes = self.evaluate(ctx).await;
        let window = ctx.settings.alert_window.as_ref();

        let mut checks = BTreeMap::new();
        let mut alerts_sent = Vec::new();
        for (name, outcome) in outcomes {
            let mut result = outcome.result;
            if let Some(req) = outcome.alert {
                let dispatched = policy.request(&req, window, ctx.now, local_time).await;
                debug!(check = %name, outcome = ?dispatched, "Alert request handled");
                if matches!(dispatched, AlertOutcome::Sent) {
                    result.alert_sent = true;
                    alerts_sent.push(name);
                }
            }
            checks.insert(name, result);
        }

        let (anomaly_score, anomaly_status) = aggregate(&checks, self.zscore_threshold);
        if anomaly_status > AnomalyStatus::Ok {
            info!(
                score = anomaly_score,
                status = %anomaly_status,
                alerts = alerts_sent.len(),
                "Anomaly pass complete"
            );
        }

        AnomalyReport {
            timestamp: ctx.now,
            batch_name: ctx.settings.batch_name.clone(),
            checks,
            anomaly_score,
            anomaly_status,
            alerts_sent,
        }
    }
}

/// Fold check results into `(score, status)`.
///
/// `score = max(z_temp, z_rate) / threshold`, 0 when the statistical check
/// produced no z-scores. Any dispatched alert makes the status critical;
/// otherwise score ≥ 1.0 is a warning and score ≥ 0.8 is elevated.
pub fn aggregate(
    checks: &BTreeMap<CheckName, AnomalyCheckResult>,
    zscore_threshold: f64,
) -> (f64, AnomalyStatus) {
    let max_z = checks
        .get(&CheckName::Statistical)
        .and_then(AnomalyCheckResult::z_scores)
        .map_or(0.0, |(t, r)| t.abs().max(r.abs()));
    let score = if zscore_threshold > 0.0 {
        max_z / zscore_threshold
    } else {
        0.0
    };

    let status = if checks.values().any(|c| c.alert_sent) {
        AnomalyStatus::Critical
    } else if score >= 1.0 {
        AnomalyStatus::Warning
    } else if score >= crate::config::defaults::ELEVATED_SCORE {
        AnomalyStatus::Elevated
    } else {
        AnomalyStatus::Ok
    };
    (score, status)
}

fn round_to(v: f64, places: i32) -> f64 {
    let m = 10_f64.powi(places);
    (v * m).round() / m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckMetrics, CheckStatus};

    fn stat(z_temp: f64, z_rate: f64) -> AnomalyCheckResult {
        AnomalyCheckResult::normal(CheckMetrics::Statistical {
            z_temp,
            z_rate,
            temp_points: 48,
            rate_points: 47,
        })
    }

    #[test]
    fn score_is_max_z_over_threshold() {
        let checks = BTreeMap::from([(CheckName::Statistical, stat(1.0, -2.0))]);
        let (score, status) = aggregate(&checks, 2.5);
        assert!((score - 0.8).abs() < 1e-12);
        assert_eq!(status, AnomalyStatus::Elevated);
    }

    #[test]
    fn escalation_levels() {
        let ok = BTreeMap::from([(CheckName::Statistical, stat(0.5, 0.5))]);
        assert_eq!(aggregate(&ok, 2.5).1, AnomalyStatus::Ok);

        let warn = BTreeMap::from([(CheckName::Statistical, stat(3.0, 0.0))]);
        assert_eq!(aggregate(&warn, 2.5).1, AnomalyStatus::Warning);

        let mut alerted = AnomalyCheckResult::new(CheckStatus::Stalled, CheckMetrics::None);
        alerted.alert_sent = true;
        let crit = BTreeMap::from([
            (CheckName::Statistical, stat(0.0, 0.0)),
            (CheckName::Stall, alerted),
        ]);
        assert_eq!(aggregate(&crit, 2.5).1, AnomalyStatus::Critical);
    }

    #[test]
    fn no_statistical_result_scores_zero() {
        let checks = BTreeMap::from([(CheckName::Stall, AnomalyCheckResult::insufficient())]);
        assert_eq!(aggregate(&checks, 2.5), (0.0, AnomalyStatus::Ok));
    }

    #[test]
    fn rounding_helper() {
        assert!((round_to(1.23456, 2) - 1.23).abs() < 1e-12);
    }
}
