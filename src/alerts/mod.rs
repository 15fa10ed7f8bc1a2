//! Alert Policy
//!
//! Gates every notification request raised by the anomaly checks:
//!
//! 1. **Cooldown**: per alert kind, measured from that kind's last
//!    successful dispatch. Never shared across kinds, never bypassed.
//! 2. **Active hours**: non-forced requests outside the configured local
//!    window are suppressed. `force` bypasses this gate only.
//! 3. **Delegation**: the [`Notifier`] performs the actual I/O, bounded by
//!    a timeout.
//!
//! The policy owns its [`CooldownTracker`]; nothing else reads or writes it.

pub mod cooldown;
pub mod quiet_hours;

pub use cooldown::CooldownTracker;
pub use quiet_hours::AlertWindow;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::config::AlertsConfig;
use crate::notify::{DashboardEvent, Delivery, Notifier, Severity};

/// Alert kinds with independent cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Stall,
    Runaway,
    Temperature,
    /// Signal loss and full offline share one window
    Signal,
    Statistical,
}

impl AlertKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            AlertKind::Stall => "stall",
            AlertKind::Runaway => "runaway",
            AlertKind::Temperature => "temperature",
            AlertKind::Signal => "signal",
            AlertKind::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification requested by a check.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRequest {
    pub kind: AlertKind,
    /// Markdown text for the user-facing channel
    pub message: String,
    /// Bypass active hours (signal loss / offline)
    pub force: bool,
    pub severity: Severity,
    /// Structured payload for the dashboard broadcast
    pub data: serde_json::Value,
}

impl AlertRequest {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            force: false,
            severity: Severity::Warning,
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// What the policy did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent,
    SuppressedCooldown { remaining: Duration },
    SuppressedQuietHours,
    /// The notifier has no channel configured
    NotConfigured(String),
    Failed(String),
}

impl AlertOutcome {
    pub const fn is_sent(&self) -> bool {
        matches!(self, AlertOutcome::Sent)
    }
}

pub struct AlertPolicy {
    notifier: Arc<dyn Notifier>,
    cooldowns: Mutex<CooldownTracker>,
    timeout: std::time::Duration,
}

impl AlertPolicy {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        cooldowns: CooldownTracker,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            notifier,
            cooldowns: Mutex::new(cooldowns),
            timeout,
        }
    }

    pub fn from_config(cfg: &AlertsConfig, notifier: Arc<dyn Notifier>) -> Self {
        let hours = |h: f64| Duration::milliseconds((h * 3_600_000.0).round() as i64);
        let windows = HashMap::from([
            (AlertKind::Temperature, hours(cfg.cooldown_temperature_hours)),
            (AlertKind::Signal, hours(cfg.cooldown_signal_hours)),
            (AlertKind::Stall, hours(cfg.cooldown_stall_hours)),
            (AlertKind::Runaway, hours(cfg.cooldown_runaway_hours)),
            (AlertKind::Statistical, hours(cfg.cooldown_statistical_hours)),
        ]);
        Self::new(
            notifier,
            CooldownTracker::new(windows),
            std::time::Duration::from_secs(cfg.notifier_timeout_secs),
        )
    }

    /// Run a request through cooldown, active hours and the notifier.
    ///
    /// `window` is the user's active-hours window (`None` = always active),
    /// `local_time` the wall-clock time it is evaluated against. The
    /// cooldown is recorded only when the notifier reports delivery.
    pub async fn request(
        &self,
        req: &AlertRequest,
        window: Option<&AlertWindow>,
        now: DateTime<Utc>,
        local_time: NaiveTime,
    ) -> AlertOutcome {
        let blocked = {
            let tracker = self.tracker();
            (!tracker.can_fire(req.kind, now)).then(|| tracker.remaining(req.kind, now))
        };
        if let Some(remaining) = blocked {
            debug!(kind = %req.kind, remaining_min = remaining.num_minutes(), "Alert suppressed by cooldown");
            return AlertOutcome::SuppressedCooldown { remaining };
        }

        if !req.force && window.is_some_and(|w| !w.is_active(local_time)) {
            debug!(kind = %req.kind, %local_time, "Alert suppressed outside active hours");
            self.broadcast(req, now);
            return AlertOutcome::SuppressedQuietHours;
        }

        let outcome = match tokio::time::timeout(self.timeout, self.notifier.send(&req.message, req.force)).await {
            Ok(Ok(Delivery::Sent)) => AlertOutcome::Sent,
            Ok(Ok(Delivery::Skipped(reason))) => AlertOutcome::NotConfigured(reason),
            Ok(Err(e)) => {
                warn!(kind = %req.kind, error = %e, failure = %e.failure_kind(), "Alert dispatch failed");
                AlertOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(kind = %req.kind, timeout = ?self.timeout, "Alert dispatch timed out");
                AlertOutcome::Failed("notifier timed out".to_string())
            }
        };

        if outcome.is_sent() {
            self.tracker().record(req.kind, now);
            info!(kind = %req.kind, force = req.force, "Alert sent");
        }
        if matches!(outcome, AlertOutcome::Sent | AlertOutcome::NotConfigured(_)) {
            self.broadcast(req, now);
        }
        outcome
    }

    pub fn last_fired(&self, kind: AlertKind) -> Option<DateTime<Utc>> {
        self.tracker().last_fired(kind)
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, CooldownTracker> {
        self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, req: &AlertRequest, now: DateTime<Utc>) {
        self.notifier.broadcast(DashboardEvent::new(
            req.kind.as_str(),
            req.message.clone(),
            req.severity,
            req.data.clone(),
            now,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use chrono::TimeZone;

    fn policy(notifier: Arc<RecordingNotifier>) -> AlertPolicy {
        AlertPolicy::from_config(&AlertsConfig::default(), notifier)
    }

    fn at(h: u32) -> (DateTime<Utc>, NaiveTime) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap();
        (now, now.time())
    }

    fn window() -> AlertWindow {
        AlertWindow::parse("08:00", "22:00").unwrap()
    }

    #[tokio::test]
    async fn quiet_hours_suppress_non_forced() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let req = AlertRequest::new(AlertKind::Temperature, "hot");

        let (now, local) = at(23);
        let out = p.request(&req, Some(&window()), now, local).await;
        assert_eq!(out, AlertOutcome::SuppressedQuietHours);
        assert!(n.sent().is_empty());

        let (now, local) = at(10);
        assert!(p.request(&req, Some(&window()), now, local).await.is_sent());
        assert_eq!(n.sent().len(), 1);
    }

    #[tokio::test]
    async fn force_bypasses_quiet_hours_not_cooldown() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let req = AlertRequest::new(AlertKind::Signal, "offline").forced();

        let (now, local) = at(23);
        assert!(p.request(&req, Some(&window()), now, local).await.is_sent());
        let later = now + Duration::hours(1);
        let out = p.request(&req, Some(&window()), later, later.time()).await;
        assert!(matches!(out, AlertOutcome::SuppressedCooldown { .. }));
        assert_eq!(n.sent(), vec![("offline".to_string(), true)]);
    }

    #[tokio::test]
    async fn cooldown_is_per_kind() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let (now, local) = at(12);
        assert!(p.request(&AlertRequest::new(AlertKind::Stall, "s"), None, now, local).await.is_sent());
        assert!(p.request(&AlertRequest::new(AlertKind::Runaway, "r"), None, now, local).await.is_sent());
        let again = p.request(&AlertRequest::new(AlertKind::Stall, "s"), None, now, local).await;
        assert!(matches!(again, AlertOutcome::SuppressedCooldown { .. }));
    }

    #[tokio::test]
    async fn failed_send_does_not_start_cooldown() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let req = AlertRequest::new(AlertKind::Stall, "s");
        let (now, local) = at(12);

        n.set_failing(true);
        assert!(matches!(p.request(&req, None, now, local).await, AlertOutcome::Failed(_)));
        assert!(p.last_fired(AlertKind::Stall).is_none());

        n.set_failing(false);
        assert!(p.request(&req, None, now, local).await.is_sent());
    }

    #[tokio::test]
    async fn cooldown_reopens_exactly_at_window_end() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let req = AlertRequest::new(AlertKind::Temperature, "t");
        let (now, local) = at(12);
        assert!(p.request(&req, None, now, local).await.is_sent());

        let almost = now + Duration::hours(4) - Duration::seconds(1);
        let out = p.request(&req, None, almost, almost.time()).await;
        assert_eq!(out, AlertOutcome::SuppressedCooldown { remaining: Duration::seconds(1) });

        let reopen = now + Duration::hours(4);
        assert!(p.request(&req, None, reopen, reopen.time()).await.is_sent());
    }

    #[tokio::test]
    async fn repeated_requests_respect_cooldown_spacing() {
        let n = Arc::new(RecordingNotifier::new());
        let p = policy(n.clone());
        let req = AlertRequest::new(AlertKind::Temperature, "t");
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut fired = Vec::new();
        // every 5 minutes for 24h
        for i in 0..288 {
            let now = start + Duration::minutes(5 * i);
            if p.request(&req, None, now, now.time()).await.is_sent() {
                fired.push(now);
            }
        }
        assert_eq!(fired.len(), 6);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::hours(4));
        }
    }
}
