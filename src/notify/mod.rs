//! Notifier abstraction
//!
//! The alert policy decides *whether* to notify; everything here only
//! delivers. Two channels:
//!
//! - `send`: user-facing message (Telegram when configured)
//! - `broadcast`: best-effort push to the live dashboard hub

pub mod dashboard;
pub mod telegram;

pub use dashboard::{DashboardEvent, DashboardHub, Severity};
pub use telegram::TelegramClient;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AlertsConfig;
use crate::types::FailureKind;

/// Outcome of a delivered (or deliberately skipped) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The notifier chose not to deliver (e.g. no channel configured)
    Skipped(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier not configured")]
    NotConfigured,

    #[error("notifier request failed: {0}")]
    Transport(String),

    #[error("notifier request timed out")]
    Timeout,

    #[error("notifier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl NotifyError {
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            NotifyError::NotConfigured => FailureKind::Configuration,
            NotifyError::Status { status: 401 | 403 | 404, .. } => FailureKind::Configuration,
            _ => FailureKind::TransientIo,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a user-facing message. `force` marks messages that bypassed
    /// quiet hours.
    async fn send(&self, message: &str, force: bool) -> Result<Delivery, NotifyError>;

    /// Push an event to the live dashboard. Failures are swallowed.
    fn broadcast(&self, event: DashboardEvent);
}

// ============================================================================
// Production notifier
// ============================================================================

/// Telegram (optional) + dashboard hub.
pub struct BrewNotifier {
    telegram: Option<TelegramClient>,
    hub: Arc<DashboardHub>,
}

impl BrewNotifier {
    pub const fn new(telegram: Option<TelegramClient>, hub: Arc<DashboardHub>) -> Self {
        Self { telegram, hub }
    }

    /// Build from the `[alerts]` section; Telegram is disabled without credentials.
    pub fn from_config(cfg: &AlertsConfig, hub: Arc<DashboardHub>) -> Self {
        let timeout = std::time::Duration::from_secs(cfg.notifier_timeout_secs);
        let telegram = cfg
            .resolved_telegram()
            .and_then(|(token, chat)| match TelegramClient::new(&token, &chat, timeout) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, "Telegram disabled");
                    None
                }
            });
        if telegram.is_none() {
            warn!("Telegram credentials not set, alerts go to the dashboard only");
        }
        Self::new(telegram, hub)
    }

    pub fn hub(&self) -> &Arc<DashboardHub> {
        &self.hub
    }
}

#[async_trait]
impl Notifier for BrewNotifier {
    async fn send(&self, message: &str, force: bool) -> Result<Delivery, NotifyError> {
        let Some(client) = &self.telegram else {
            debug!(force, "No Telegram channel, message skipped");
            return Ok(Delivery::Skipped("telegram credentials not set".to_string()));
        };
        client.send_message(message).await?;
        debug!(force, "Telegram message sent");
        Ok(Delivery::Sent)
    }

    fn broadcast(&self, event: DashboardEvent) {
        self.hub.publish(event);
    }
}

// ============================================================================
// Recording notifier
// ============================================================================

/// Notifier that keeps every message in memory.
///
/// Used by `--demo` runs without Telegram and by tests to assert what the
/// policy dispatched.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, bool)>>,
    events: Mutex<Vec<DashboardEvent>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// `(message, force)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, bool)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<DashboardEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str, force: bool) -> Result<Delivery, NotifyError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Transport("simulated failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((message.to_string(), force));
        }
        Ok(Delivery::Sent)
    }

    fn broadcast(&self, event: DashboardEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn brew_notifier_without_telegram_skips() {
        let hub = Arc::new(DashboardHub::new(4));
        let n = BrewNotifier::new(None, hub.clone());
        let d = n.send("hello", false).await.unwrap();
        assert!(matches!(d, Delivery::Skipped(_)));

        n.broadcast(DashboardEvent::new(
            "status",
            "ok",
            Severity::Info,
            serde_json::json!({}),
            Utc::now(),
        ));
        assert_eq!(hub.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn recording_notifier_records_and_fails_on_demand() {
        let n = RecordingNotifier::new();
        n.send("a", true).await.unwrap();
        n.set_failing(true);
        assert!(n.send("b", false).await.is_err());
        assert_eq!(n.sent(), vec![("a".to_string(), true)]);
    }

    #[test]
    fn missing_chat_is_configuration_error() {
        let e = NotifyError::Status { status: 404, body: String::new() };
        assert_eq!(e.failure_kind(), FailureKind::Configuration);
        assert_eq!(NotifyError::Timeout.failure_kind(), FailureKind::TransientIo);
    }
}
