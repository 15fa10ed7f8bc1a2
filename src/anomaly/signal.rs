//! Hydrometer signal loss and full offline detection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{round_to, AnomalyCheck, CheckContext, CheckOutcome};
use crate::alerts::{AlertKind, AlertRequest};
use crate::notify::Severity;
use crate::store::{Reducer, StoreError};
use crate::types::{
    AnomalyCheckResult, CheckMetrics, CheckName, CheckStatus, GatewayStatus, LiveSensorState,
};

pub struct SignalCheck;

/// Classify the silence since the latest sample.
///
/// Only the stored series counts as a sample. A gateway that answers polls
/// may still be serving a stale cached reading, so the live state is
/// reported as gateway reachability and never resets the silence. No sample
/// at all is `offline`; silence longer than `timeout_min` is `signal_loss`.
pub fn evaluate(
    last_sample: Option<DateTime<Utc>>,
    live: Option<&LiveSensorState>,
    timeout_min: f64,
    now: DateTime<Utc>,
) -> AnomalyCheckResult {
    let gateway = live.map_or(GatewayStatus::Startup, |l| l.status);

    let Some(last_seen) = last_sample else {
        return AnomalyCheckResult::new(
            CheckStatus::Offline,
            CheckMetrics::Signal {
                last_seen: None,
                minutes_since: None,
                timeout_min,
                gateway,
            },
        );
    };

    let minutes_since = (now - last_seen).num_seconds() as f64 / 60.0;
    let metrics = CheckMetrics::Signal {
        last_seen: Some(last_seen),
        minutes_since: Some(round_to(minutes_since, 1)),
        timeout_min,
        gateway,
    };
    if minutes_since > timeout_min {
        AnomalyCheckResult::new(CheckStatus::SignalLoss, metrics)
    } else {
        AnomalyCheckResult::normal(metrics)
    }
}

#[async_trait]
impl AnomalyCheck for SignalCheck {
    fn name(&self) -> CheckName {
        CheckName::SignalLoss
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, StoreError> {
        let window = Duration::hours(ctx.config.signal_offline_hours);
        let last = ctx.gravity(window, Reducer::Last).await?;
        let result = evaluate(
            last.last().map(|(t, _)| *t),
            ctx.live,
            ctx.settings.tilt_timeout_min,
            ctx.now,
        );

        let CheckMetrics::Signal { minutes_since, gateway, .. } = result.metrics else {
            return Ok(CheckOutcome::quiet(result));
        };
        let gateway_line = match gateway {
            GatewayStatus::Unreachable => "Gateway: unreachable",
            GatewayStatus::Healthy => "Gateway: reachable",
            GatewayStatus::Startup => "Gateway: not polled yet",
        };

        let message = match result.status {
            CheckStatus::Offline => format!(
                "*HYDROMETER OFFLINE: {}*\n\n\
                 No readings in the last {} hours!\n\
                 {}\n\n\
                 *Check:*\n\
                 - Hydrometer battery\n\
                 - Gateway / Bluetooth connection\n\
                 - Hydrometer orientation in wort",
                ctx.batch_name(),
                ctx.config.signal_offline_hours,
                gateway_line,
            ),
            CheckStatus::SignalLoss => format!(
                "*HYDROMETER SIGNAL LOSS: {}*\n\n\
                 Last reading: {} minutes ago\n\
                 Threshold: {} minutes\n\
                 {}\n\n\
                 *Check:*\n\
                 - Hydrometer battery\n\
                 - Gateway service status\n\
                 - Bluetooth connectivity",
                ctx.batch_name(),
                minutes_since.unwrap_or_default() as i64,
                ctx.settings.tilt_timeout_min,
                gateway_line,
            ),
            _ => return Ok(CheckOutcome::quiet(result)),
        };

        let severity = if result.status == CheckStatus::Offline {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let alert = AlertRequest::new(AlertKind::Signal, message)
            .forced()
            .severity(severity)
            .data(serde_json::json!({
                "minutes_since": minutes_since,
                "gateway": gateway,
            }));
        Ok(CheckOutcome::alerting(result, alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn ninety_minutes_silence_is_signal_loss() {
        let r = evaluate(Some(now() - Duration::minutes(90)), None, 60.0, now());
        assert_eq!(r.status, CheckStatus::SignalLoss);
    }

    #[test]
    fn recent_sample_is_normal() {
        let r = evaluate(Some(now() - Duration::minutes(10)), None, 60.0, now());
        assert_eq!(r.status, CheckStatus::Normal);
    }

    #[test]
    fn nothing_at_all_is_offline() {
        let r = evaluate(None, None, 60.0, now());
        assert_eq!(r.status, CheckStatus::Offline);
    }

    #[test]
    fn healthy_gateway_does_not_mask_stale_samples() {
        let live = LiveSensorState {
            last_seen: Some(now()),
            status: GatewayStatus::Healthy,
            ..Default::default()
        };
        let r = evaluate(Some(now() - Duration::minutes(90)), Some(&live), 60.0, now());
        assert_eq!(r.status, CheckStatus::SignalLoss);
        match r.metrics {
            CheckMetrics::Signal { gateway, minutes_since, .. } => {
                assert_eq!(gateway, GatewayStatus::Healthy);
                assert_eq!(minutes_since, Some(90.0));
            }
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn live_reading_alone_is_still_offline() {
        let live = LiveSensorState {
            last_seen: Some(now()),
            status: GatewayStatus::Healthy,
            ..Default::default()
        };
        let r = evaluate(None, Some(&live), 60.0, now());
        assert_eq!(r.status, CheckStatus::Offline);
    }
}
