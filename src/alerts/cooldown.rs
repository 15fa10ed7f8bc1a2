//! Per-alert-kind cooldown tracker

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use super::AlertKind;

/// Enforces a minimum spacing between two alerts of the same kind.
///
/// Kinds never share a window. Only successful dispatches are recorded, so
/// a failed send is retried on the next pass. State is in-memory and resets
/// with the process.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    windows: HashMap<AlertKind, Duration>,
    last_fired: HashMap<AlertKind, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(windows: HashMap<AlertKind, Duration>) -> Self {
        Self {
            windows,
            last_fired: HashMap::new(),
        }
    }

    /// Cooldown for `kind`; kinds without an entry have none.
    pub fn window(&self, kind: AlertKind) -> Duration {
        self.windows.get(&kind).copied().unwrap_or_else(Duration::zero)
    }

    /// True if no alert of this kind fired within its window before `now`.
    pub fn can_fire(&self, kind: AlertKind, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(&kind) {
            None => true,
            Some(last) => now - *last >= self.window(kind),
        }
    }

    /// Time left until `kind` may fire again.
    pub fn remaining(&self, kind: AlertKind, now: DateTime<Utc>) -> Duration {
        self.last_fired
            .get(&kind)
            .map(|last| (*last + self.window(kind) - now).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    /// Record a successful dispatch.
    pub fn record(&mut self, kind: AlertKind, now: DateTime<Utc>) {
        self.last_fired.insert(kind, now);
    }

    pub fn last_fired(&self, kind: AlertKind) -> Option<DateTime<Utc>> {
        self.last_fired.get(&kind).copied()
    }
}
