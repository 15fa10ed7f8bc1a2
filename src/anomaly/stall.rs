//! Stalled fermentation: gravity still high but barely moving.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{round_to, AnomalyCheck, CheckContext, CheckOutcome};
use crate::alerts::{AlertKind, AlertRequest};
use crate::config::AnomalyConfig;
use crate::store::{Reducer, StoreError};
use crate::types::{AnomalyCheckResult, CheckMetrics, CheckName, CheckStatus};

pub struct StallCheck;

/// Evaluate hourly-mean gravity over the stall window.
///
/// Slope is `(first − last) · 1000` points per day between the first and
/// last aggregated samples. Needs `stall_min_points` samples spanning at
/// least an hour.
pub fn evaluate(hourly: &[(DateTime<Utc>, f64)], cfg: &AnomalyConfig) -> AnomalyCheckResult {
    if hourly.len() < cfg.stall_min_points {
        return AnomalyCheckResult::insufficient();
    }
    let (Some(&(t_first, first)), Some(&(t_last, last))) = (hourly.first(), hourly.last()) else {
        return AnomalyCheckResult::insufficient();
    };

    let hours = (t_last - t_first).num_seconds() as f64 / 3600.0;
    if hours < 1.0 {
        return AnomalyCheckResult::insufficient();
    }

    let points_per_day = (first - last) * 1000.0 / (hours / 24.0);
    let metrics = CheckMetrics::Stall {
        points: hourly.len(),
        hours: round_to(hours, 2),
        first_gravity: round_to(first, 4),
        last_gravity: round_to(last, 4),
        points_per_day: round_to(points_per_day, 2),
    };

    if last > cfg.stall_gravity_floor && points_per_day < cfg.stall_min_points_per_day {
        AnomalyCheckResult::new(CheckStatus::Stalled, metrics)
    } else {
        AnomalyCheckResult::normal(metrics)
    }
}

#[async_trait]
impl AnomalyCheck for StallCheck {
    fn name(&self) -> CheckName {
        CheckName::Stall
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError> {
        let window = Duration::hours(ctx.config.stall_window_hours);
        let hourly = ctx
            .gravity(window, Reducer::WindowMean(Duration::hours(1)))
            .await?;
        let result = evaluate(&hourly, ctx.config);

        if result.status != CheckStatus::Stalled {
            return Ok(CheckOutcome::quiet(result));
        }
        let CheckMetrics::Stall { first_gravity, last_gravity, points_per_day, .. } = result.metrics
        else {
            return Ok(CheckOutcome::quiet(result));
        };

        let message = format!(
            "*STALLED FERMENTATION: {}*\n\n\
             SG change: {:.4} ({:.1} pts/day)\n\
             Current SG: {:.3}\n\n\
             *Suggestions:*\n\
             - Check temperature (raise to 20°C)\n\
             - Gently rouse yeast\n\
             - Consider yeast nutrient",
            ctx.batch_name(),
            first_gravity - last_gravity,
            points_per_day,
            last_gravity,
        );
        let alert = AlertRequest::new(AlertKind::Stall, message).data(serde_json::json!({
            "current_sg": last_gravity,
            "points_per_day": points_per_day,
        }));
        Ok(CheckOutcome::alerting(result, alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        let t0 = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn flat_high_gravity_is_stalled() {
        let r = evaluate(&hourly(&[1.040; 24]), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Stalled);
    }

    #[test]
    fn active_fermentation_is_normal() {
        let values: Vec<f64> = (0..24).map(|i| 1.050 - 0.0005 * f64::from(i)).collect();
        let r = evaluate(&hourly(&values), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Normal);
        match r.metrics {
            CheckMetrics::Stall { points_per_day, .. } => assert!(points_per_day > 10.0),
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn finished_beer_is_not_stalled() {
        let r = evaluate(&hourly(&[1.010; 24]), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Normal);
    }

    #[test]
    fn needs_four_points() {
        let r = evaluate(&hourly(&[1.040; 3]), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::InsufficientData);
    }
}
