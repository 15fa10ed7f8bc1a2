//! Statistical outlier check over hourly temperature and fermentation rate.
//!
//! Baseline mean and standard deviation come from every point but the most
//! recent one; the most recent point is scored against that baseline. The
//! rate series is the first difference of gravity in points, sign-flipped so
//! active fermentation reads positive.

use async_trait::async_trait;
use chrono::Duration;
use statrs::statistics::Statistics;

use super::{round_to, AnomalyCheck, CheckContext, CheckOutcome};
use crate::alerts::{AlertKind, AlertRequest};
use crate::config::AnomalyConfig;
use crate::store::{Reducer, StoreError};
use crate::types::{AnomalyCheckResult, CheckMetrics, CheckName, CheckStatus};

pub struct ZScoreCheck;

/// `|last − mean(baseline)| / max(std(baseline), floor)`.
///
/// `None` below `min_points` values.
pub fn latest_z(values: &[f64], min_points: usize, std_floor: f64) -> Option<f64> {
    if values.len() < min_points.max(3) {
        return None;
    }
    let (latest, baseline) = values.split_last()?;
    let mean = baseline.iter().mean();
    let std = baseline.iter().std_dev();
    let std = if std.is_finite() { std.max(std_floor) } else { std_floor };
    let z = ((latest - mean) / std).abs();
    z.is_finite().then_some(z)
}

/// Points of gravity drop between consecutive samples.
pub fn rate_series(gravity: &[f64]) -> Vec<f64> {
    gravity.windows(2).map(|w| (w[0] - w[1]) * 1000.0).collect()
}

pub fn evaluate(temps_c: &[f64], gravity: &[f64], cfg: &AnomalyConfig) -> AnomalyCheckResult {
    let rates = rate_series(gravity);
    let z_temp = latest_z(temps_c, cfg.zscore_min_points, cfg.zscore_std_floor);
    let z_rate = latest_z(&rates, cfg.zscore_min_points, cfg.zscore_std_floor);

    if z_temp.is_none() && z_rate.is_none() {
        return AnomalyCheckResult::insufficient();
    }

    let z_temp = z_temp.unwrap_or(0.0);
    let z_rate = z_rate.unwrap_or(0.0);
    let metrics = CheckMetrics::Statistical {
        z_temp: round_to(z_temp, 2),
        z_rate: round_to(z_rate, 2),
        temp_points: temps_c.len(),
        rate_points: rates.len(),
    };

    if z_temp.max(z_rate) > cfg.zscore_threshold {
        AnomalyCheckResult::new(CheckStatus::Anomaly, metrics)
    } else {
        AnomalyCheckResult::normal(metrics)
    }
}

#[async_trait]
impl AnomalyCheck for ZScoreCheck {
    fn name(&self) -> CheckName {
        CheckName::Statistical
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError> {
        let window = Duration::hours(ctx.config.zscore_window_hours);
        let hourly = Reducer::WindowMean(Duration::hours(1));
        let (temps, gravity) = futures::try_join!(
            ctx.temperature_c(window, hourly),
            ctx.gravity(window, hourly),
        )?;
        let temps: Vec<f64> = temps.into_iter().map(|(_, v)| v).collect();
        let gravity: Vec<f64> = gravity.into_iter().map(|(_, v)| v).collect();

        let result = evaluate(&temps, &gravity, ctx.config);
        if result.status != CheckStatus::Anomaly {
            return Ok(CheckOutcome::quiet(result));
        }
        let CheckMetrics::Statistical { z_temp, z_rate, .. } = result.metrics else {
            return Ok(CheckOutcome::quiet(result));
        };

        let score = z_temp.max(z_rate) / ctx.config.zscore_threshold;
        let driver = if z_temp >= z_rate { "temperature" } else { "fermentation rate" };
        let message = format!(
            "*STATISTICAL ANOMALY: {}*\n\n\
             Unusual {} in the last hour\n\
             Temp z-score: {:.1}\n\
             Rate z-score: {:.1}\n\
             Anomaly score: {:.2}",
            ctx.batch_name(),
            driver,
            z_temp,
            z_rate,
            score,
        );
        let alert = AlertRequest::new(AlertKind::Statistical, message).data(serde_json::json!({
            "z_temp": z_temp,
            "z_rate": z_rate,
            "anomaly_score": round_to(score, 2),
        }));
        Ok(CheckOutcome::alerting(result, alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_gravity(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.050 - 0.0005 * i as f64).collect()
    }

    #[test]
    fn stable_series_is_normal() {
        let temps = vec![21.0; 48];
        let r = evaluate(&temps, &steady_gravity(48), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Normal);
        let (zt, zr) = r.z_scores().unwrap();
        assert!(zt < 1e-9 && zr < 1e-6);
    }

    #[test]
    fn temperature_spike_after_flat_baseline() {
        let mut temps = vec![20.0; 47];
        temps.push(29.0);
        let r = evaluate(&temps, &steady_gravity(48), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Anomaly);
        // std floored at 0.1 -> z = 90
        let (zt, _) = r.z_scores().unwrap();
        assert!((zt - 90.0).abs() < 1e-6);
    }

    #[test]
    fn noisy_baseline_with_spike() {
        let mut temps: Vec<f64> = [21.1, 21.2, 21.0, 21.1].repeat(11);
        temps.extend([21.1, 21.2, 21.0, 29.4]);
        let r = evaluate(&temps, &steady_gravity(48), &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::Anomaly);
    }

    #[test]
    fn rate_is_sign_flipped_difference() {
        let r = rate_series(&[1.050, 1.048, 1.047]);
        assert!((r[0] - 2.0).abs() < 1e-9);
        assert!((r[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_points_is_insufficient() {
        let r = evaluate(&[20.0; 5], &[1.05; 5], &AnomalyConfig::default());
        assert_eq!(r.status, CheckStatus::InsufficientData);
    }
}
