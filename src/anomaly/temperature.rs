//! Temperature deviation from the yeast target, and the hard ceiling.

use async_trait::async_trait;
use chrono::Duration;

use super::{round_to, AnomalyCheck, CheckContext, CheckOutcome};
use crate::alerts::{AlertKind, AlertRequest};
use crate::notify::Severity;
use crate::store::{Reducer, StoreError};
use crate::types::{AnomalyCheckResult, CheckMetrics, CheckName, CheckStatus};

pub struct TemperatureCheck;

/// Band the 30-minute mean is compared against, all °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureBand {
    pub target_c: f64,
    pub deviation_c: f64,
    /// Hard ceiling; above it the status is `over_limit`
    pub ceiling_c: f64,
}

pub fn evaluate(samples_c: &[f64], band: TemperatureBand) -> AnomalyCheckResult {
    if samples_c.is_empty() {
        return AnomalyCheckResult::insufficient();
    }
    let mean = samples_c.iter().sum::<f64>() / samples_c.len() as f64;
    let deviation = mean - band.target_c;
    let metrics = CheckMetrics::Temperature {
        mean_temp_c: round_to(mean, 2),
        target_c: round_to(band.target_c, 2),
        deviation_c: round_to(deviation, 2),
        ceiling_c: round_to(band.ceiling_c, 2),
        samples: samples_c.len(),
    };

    if mean > band.ceiling_c {
        AnomalyCheckResult::new(CheckStatus::OverLimit, metrics)
    } else if deviation.abs() > band.deviation_c {
        AnomalyCheckResult::new(CheckStatus::Deviation, metrics)
    } else {
        AnomalyCheckResult::normal(metrics)
    }
}

impl TemperatureCheck {
    /// Target from the explicit override or the yeast band midpoint; ceiling
    /// is the lower of `temp_max` and the yeast's upper tolerance.
    pub fn band(ctx: &CheckContext<'_>) -> TemperatureBand {
        let batch = &ctx.settings.batch;
        let ceiling_c = batch
            .yeast_max_temp_c
            .map_or(ctx.settings.temp_max_c, |y| y.min(ctx.settings.temp_max_c));
        TemperatureBand {
            target_c: ctx.config.temp_target_c.unwrap_or_else(|| batch.target_temp_c()),
            deviation_c: ctx.config.temp_deviation_c,
            ceiling_c,
        }
    }
}

#[async_trait]
impl AnomalyCheck for TemperatureCheck {
    fn name(&self) -> CheckName {
        CheckName::TempDeviation
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError> {
        let window = Duration::minutes(ctx.config.temp_window_minutes);
        let samples: Vec<f64> = ctx
            .temperature_c(window, Reducer::None)
            .await?
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        let band = Self::band(ctx);
        let result = evaluate(&samples, band);

        let CheckMetrics::Temperature { mean_temp_c, deviation_c, .. } = result.metrics else {
            return Ok(CheckOutcome::quiet(result));
        };

        let (message, severity) = match result.status {
            CheckStatus::OverLimit => (
                format!(
                    "*TEMPERATURE OVER LIMIT: {}*\n\n\
                     Current temp: {:.1}°C\n\
                     Ceiling: {:.1}°C\n\n\
                     *Action:* Check glycol chiller / heating wrap",
                    ctx.batch_name(),
                    mean_temp_c,
                    band.ceiling_c,
                ),
                Severity::Critical,
            ),
            CheckStatus::Deviation => {
                let direction = if deviation_c > 0.0 { "HIGH" } else { "LOW" };
                (
                    format!(
                        "*TEMP DEVIATION: {}*\n\n\
                         Current temp: {:.1}°C\n\
                         Target: {:.1}°C (±{:.1}°C)\n\
                         Deviation: {:.1}°C {}\n\n\
                         *Action:* Check glycol chiller / heating wrap",
                        ctx.batch_name(),
                        mean_temp_c,
                        band.target_c,
                        band.deviation_c,
                        deviation_c.abs(),
                        direction,
                    ),
                    Severity::Warning,
                )
            }
            _ => return Ok(CheckOutcome::quiet(result)),
        };

        let alert = AlertRequest::new(AlertKind::Temperature, message)
            .severity(severity)
            .data(serde_json::json!({
                "current_temp_c": mean_temp_c,
                "target_c": band.target_c,
                "deviation_c": deviation_c,
            }));
        Ok(CheckOutcome::alerting(result, alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAND: TemperatureBand = TemperatureBand {
        target_c: 20.0,
        deviation_c: 1.1,
        ceiling_c: 28.0,
    };

    #[test]
    fn within_band_is_normal() {
        assert_eq!(evaluate(&[20.5, 19.8, 20.9], BAND).status, CheckStatus::Normal);
    }

    #[test]
    fn outside_band_is_deviation() {
        assert_eq!(evaluate(&[22.0, 22.4], BAND).status, CheckStatus::Deviation);
        assert_eq!(evaluate(&[18.0], BAND).status, CheckStatus::Deviation);
    }

    #[test]
    fn above_ceiling_is_over_limit() {
        assert_eq!(evaluate(&[29.0, 29.5], BAND).status, CheckStatus::OverLimit);
    }

    #[test]
    fn no_samples_is_insufficient() {
        assert_eq!(evaluate(&[], BAND).status, CheckStatus::InsufficientData);
    }
}
