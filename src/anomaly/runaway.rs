//! Runaway fermentation: gravity dropping too fast.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{round_to, AnomalyCheck, CheckContext, CheckOutcome};
use crate::alerts::{AlertKind, AlertRequest};
use crate::config::AnomalyConfig;
use crate::store::{Reducer, StoreError};
use crate::types::{AnomalyCheckResult, CheckMetrics, CheckName, CheckStatus};

pub struct RunawayCheck;

/// Compare the first and last gravity samples of the runaway window.
pub fn evaluate(
    first: Option<(DateTime<Utc>, f64)>,
    last: Option<(DateTime<Utc>, f64)>,
    cfg: &AnomalyConfig,
) -> AnomalyCheckResult {
    let (Some((t_first, first)), Some((t_last, last))) = (first, last) else {
        return AnomalyCheckResult::insufficient();
    };

    let drop_points = (first - last) * 1000.0;
    let metrics = CheckMetrics::Runaway {
        first_gravity: round_to(first, 4),
        last_gravity: round_to(last, 4),
        drop_points: round_to(drop_points, 1),
        hours: round_to((t_last - t_first).num_seconds() as f64 / 3600.0, 2),
    };

    if drop_points > cfg.runaway_drop_points {
        AnomalyCheckResult::new(CheckStatus::Runaway, metrics)
    } else {
        AnomalyCheckResult::normal(metrics)
    }
}

#[async_trait]
impl AnomalyCheck for RunawayCheck {
    fn name(&self) -> CheckName {
        CheckName::Runaway
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError> {
        let window = Duration::hours(ctx.config.runaway_window_hours);
        let (first, last) = futures::try_join!(
            ctx.gravity(window, Reducer::First),
            ctx.gravity(window, Reducer::Last),
        )?;
        let result = evaluate(first.first().copied(), last.last().copied(), ctx.config);

        let CheckMetrics::Runaway { first_gravity, last_gravity, drop_points, .. } = result.metrics
        else {
            return Ok(CheckOutcome::quiet(result));
        };
        if result.status != CheckStatus::Runaway {
            return Ok(CheckOutcome::quiet(result));
        }

        let message = format!(
            "*RUNAWAY FERMENTATION: {}*\n\n\
             SG drop ({}h): {:.4} ({:.0} pts)\n\
             Current SG: {:.3}\n\n\
             *Check:*\n\
             - Current temperature (exothermic heat?)\n\
             - Blowoff tube clearance\n\
             - Lower temp if needed",
            ctx.batch_name(),
            ctx.config.runaway_window_hours,
            first_gravity - last_gravity,
            drop_points,
            last_gravity,
        );
        let alert = AlertRequest::new(AlertKind::Runaway, message).data(serde_json::json!({
            "drop_points": drop_points,
            "current_sg": last_gravity,
        }));
        Ok(CheckOutcome::alerting(result, alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: i64, g: f64) -> Option<(DateTime<Utc>, f64)> {
        Some((Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap() + Duration::hours(h), g))
    }

    #[test]
    fn thirty_point_drop_is_runaway() {
        let r = evaluate(at(0, 1.050), at(12, 1.020), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Runaway);
    }

    #[test]
    fn moderate_drop_is_normal() {
        let r = evaluate(at(0, 1.050), at(12, 1.040), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Normal);
    }

    #[test]
    fn missing_endpoint_is_insufficient() {
        let r = evaluate(at(0, 1.050), None, &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::InsufficientData);
    }
}
