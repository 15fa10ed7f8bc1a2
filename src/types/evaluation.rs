//! Typed evaluation result shared by the predictor and the anomaly checks.

use serde::{Deserialize, Serialize};

/// Why an evaluation could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Store, network or notifier unreachable / timed out
    TransientIo,
    /// Curve fit did not converge or produced non-finite values
    NonConvergence,
    /// Missing credentials or keys for an external collaborator
    Configuration,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TransientIo => write!(f, "transient_io"),
            FailureKind::NonConvergence => write!(f, "non_convergence"),
            FailureKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// `Ready(value) | InsufficientData | Failed(kind, detail)`.
///
/// Insufficient data is a normal outcome at the edges of a batch and is never
/// alerted on; failures carry enough detail to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation<T> {
    Ready(T),
    InsufficientData { reason: String },
    Failed { kind: FailureKind, detail: String },
}

impl<T> Evaluation<T> {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Evaluation::InsufficientData { reason: reason.into() }
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Evaluation::Failed { kind, detail: detail.into() }
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self, Evaluation::Ready(_))
    }

    /// The value, discarding the reason it may be missing.
    pub fn ready(self) -> Option<T> {
        match self {
            Evaluation::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Evaluation<U> {
        match self {
            Evaluation::Ready(v) => Evaluation::Ready(f(v)),
            Evaluation::InsufficientData { reason } => Evaluation::InsufficientData { reason },
            Evaluation::Failed { kind, detail } => Evaluation::Failed { kind, detail },
        }
    }
}
