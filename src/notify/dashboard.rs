//! In-process dashboard event hub
//!
//! Live subscribers get events over a `tokio::sync::broadcast` channel; a
//! bounded ring of recent events serves late joiners and `GET /api/v2/events`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Dashboard severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One event pushed to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Event type, e.g. `status`, `stall`, `signal_loss`
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub data: serde_json::Value,
}

impl DashboardEvent {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind: kind.into(),
            message: message.into(),
            severity,
            data,
        }
    }
}

pub struct DashboardHub {
    sender: broadcast::Sender<DashboardEvent>,
    recent: Mutex<VecDeque<DashboardEvent>>,
    capacity: usize,
}

impl DashboardHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Publish an event. Never fails: no subscribers is not an error.
    pub fn publish(&self, event: DashboardEvent) {
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, oldest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<DashboardEvent> {
        match self.recent.lock() {
            Ok(recent) => {
                let skip = recent.len().saturating_sub(limit);
                recent.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for DashboardHub {
    fn default() -> Self {
        Self::new(crate::config::defaults::DASHBOARD_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str) -> DashboardEvent {
        DashboardEvent::new(kind, "m", Severity::Info, serde_json::Value::Null, Utc::now())
    }

    #[test]
    fn ring_is_bounded() {
        let hub = DashboardHub::new(3);
        for k in ["a", "b", "c", "d"] {
            hub.publish(event(k));
        }
        let kinds: Vec<String> = hub.recent(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["b", "c", "d"]);
        assert_eq!(hub.recent(1)[0].kind, "d");
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = DashboardHub::new(8);
        let mut rx = hub.subscribe();
        hub.publish(event("status"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, "status");
    }

    #[test]
    fn event_serializes_type_field() {
        let json = serde_json::to_value(event("stall")).unwrap();
        assert_eq!(json["type"], "stall");
        assert_eq!(json["severity"], "info");
    }
}
