//! Anomaly check results and the aggregated report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::GatewayStatus;

// ============================================================================
// Check Identity & Status
// ============================================================================

/// The five independent anomaly checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Stall,
    Runaway,
    TempDeviation,
    SignalLoss,
    Statistical,
}

impl CheckName {
    pub const ALL: [CheckName; 5] = [
        CheckName::Stall,
        CheckName::Runaway,
        CheckName::TempDeviation,
        CheckName::SignalLoss,
        CheckName::Statistical,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CheckName::Stall => "stall",
            CheckName::Runaway => "runaway",
            CheckName::TempDeviation => "temp_deviation",
            CheckName::SignalLoss => "signal_loss",
            CheckName::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for CheckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Normal,
    InsufficientData,
    Stalled,
    Runaway,
    /// 30-minute mean outside the yeast target band
    Deviation,
    /// 30-minute mean above the hard ceiling
    OverLimit,
    SignalLoss,
    /// No sample at all within the last 24h
    Offline,
    /// Statistical outlier
    Anomaly,
    /// The check could not run (store unreachable etc.)
    Error,
}

impl CheckStatus {
    /// True for statuses that describe a detected anomaly condition.
    pub const fn is_anomalous(self) -> bool {
        !matches!(
            self,
            CheckStatus::Normal | CheckStatus::InsufficientData | CheckStatus::Error
        )
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckStatus::Normal => "normal",
            CheckStatus::InsufficientData => "insufficient_data",
            CheckStatus::Stalled => "stalled",
            CheckStatus::Runaway => "runaway",
            CheckStatus::Deviation => "deviation",
            CheckStatus::OverLimit => "over_limit",
            CheckStatus::SignalLoss => "signal_loss",
            CheckStatus::Offline => "offline",
            CheckStatus::Anomaly => "anomaly",
            CheckStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Per-check diagnostic values, tagged by check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckMetrics {
    None,
    Stall {
        points: usize,
        hours: f64,
        first_gravity: f64,
        last_gravity: f64,
        points_per_day: f64,
    },
    Runaway {
        first_gravity: f64,
        last_gravity: f64,
        drop_points: f64,
        hours: f64,
    },
    Temperature {
        mean_temp_c: f64,
        target_c: f64,
        deviation_c: f64,
        ceiling_c: f64,
        samples: usize,
    },
    Signal {
        last_seen: Option<DateTime<Utc>>,
        minutes_since: Option<f64>,
        timeout_min: f64,
        gateway: GatewayStatus,
    },
    Statistical {
        z_temp: f64,
        z_rate: f64,
        temp_points: usize,
        rate_points: usize,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Result of one anomaly check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCheckResult {
    pub status: CheckStatus,
    pub alert_sent: bool,
    pub metrics: CheckMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnomalyCheckResult {
    pub const fn new(status: CheckStatus, metrics: CheckMetrics) -> Self {
        Self {
            status,
            alert_sent: false,
            metrics,
            error: None,
        }
    }

    pub const fn normal(metrics: CheckMetrics) -> Self {
        Self::new(CheckStatus::Normal, metrics)
    }

    pub const fn insufficient() -> Self {
        Self::new(CheckStatus::InsufficientData, CheckMetrics::None)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            alert_sent: false,
            metrics: CheckMetrics::None,
            error: Some(detail.into()),
        }
    }

    /// z-scores carried by a statistical result.
    pub fn z_scores(&self) -> Option<(f64, f64)> {
        match self.metrics {
            CheckMetrics::Statistical { z_temp, z_rate, .. } => Some((z_temp, z_rate)),
            _ => None,
        }
    }
}

/// Escalation level of the aggregated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    #[default]
    Ok,
    Elevated,
    Warning,
    Critical,
}

impl std::fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyStatus::Ok => write!(f, "ok"),
            AnomalyStatus::Elevated => write!(f, "elevated"),
            AnomalyStatus::Warning => write!(f, "warning"),
            AnomalyStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Combined output of one anomaly pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub timestamp: DateTime<Utc>,
    pub batch_name: Option<String>,
    pub checks: BTreeMap<CheckName, AnomalyCheckResult>,
    pub anomaly_score: f64,
    pub anomaly_status: AnomalyStatus,
    /// Names of checks that dispatched an alert this pass
    pub alerts_sent: Vec<CheckName>,
}

impl AnomalyReport {
    pub fn check(&self, name: CheckName) -> Option<&AnomalyCheckResult> {
        self.checks.get(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn informational_statuses_are_not_anomalous() {
        assert!(!CheckStatus::Normal.is_anomalous());
        assert!(!CheckStatus::InsufficientData.is_anomalous());
        assert!(!CheckStatus::Error.is_anomalous());
        assert!(CheckStatus::Stalled.is_anomalous());
        assert!(CheckStatus::Offline.is_anomalous());
    }

    #[test]
    fn statuses_serialize_snake_case() {
        let json = serde_json::to_string(&CheckStatus::InsufficientData).unwrap();
        assert_eq!(json, "\"insufficient_data\"");
        let json = serde_json::to_string(&CheckName::TempDeviation).unwrap();
        assert_eq!(json, "\"temp_deviation\"");
    }

    #[test]
    fn escalation_is_ordered() {
        assert!(AnomalyStatus::Ok < AnomalyStatus::Elevated);
        assert!(AnomalyStatus::Warning < AnomalyStatus::Critical);
    }
}
