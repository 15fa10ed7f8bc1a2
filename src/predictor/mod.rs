//! Fermentation Curve Predictor
//!
//! Estimates terminal gravity and completion time from the calibrated
//! gravity series by fitting a bounded four-parameter logistic decay.
//!
//! ## Pipeline
//!
//! 1. Domain filter (0.900..=1.200), at least 50 surviving points
//! 2. 5-sample median filter
//! 3. Initial guess: physics-informed from OG + attenuation when plausible,
//!    otherwise data-driven (observed drop and minimum)
//! 4. Bounded Levenberg-Marquardt fit ([`fit::fit_logistic`])
//! 5. Analytic completion hour (within 0.001 of the asymptote)
//!
//! [`Predictor::predict`] is a pure function of its inputs. `now` is only
//! used to derive `days_remaining`.

pub mod fit;
pub mod smoothing;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::defaults;
use crate::types::{BatchContext, Evaluation, FailureKind};

pub use fit::{fit_logistic, Bounds, FitError, FitReport, LogisticParams};
pub use smoothing::median_filter;

/// Latest prediction. Superseded, never merged, by the next computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Fitted asymptote rounded to 3 decimals
    pub predicted_fg: f64,
    /// `None` when the fitted curve never comes within epsilon of the asymptote
    pub completion: Option<DateTime<Utc>>,
    /// Whole days from `computed_at` to `completion`, floored at zero
    pub days_remaining: Option<i64>,
    pub computed_at: DateTime<Utc>,
    pub params: LogisticParams,
    pub points_used: usize,
    pub sse: f64,
}

impl PredictionResult {
    /// The `(predicted_fg, completion)` pair consumed by display code.
    pub const fn summary(&self) -> (f64, Option<DateTime<Utc>>) {
        (self.predicted_fg, self.completion)
    }
}

/// Predictor tuning. Defaults match the production constants.
#[derive(Debug, Clone)]
pub struct Predictor {
    pub min_points: usize,
    pub median_window: usize,
    pub initial_k: f64,
    pub completion_epsilon: f64,
    pub max_evaluations: usize,
    pub bounds: Bounds,
}

impl Default for Predictor {
    fn default() -> Self {
        Self {
            min_points: defaults::MIN_POINTS_FOR_PREDICTION,
            median_window: defaults::MEDIAN_WINDOW,
            initial_k: defaults::INITIAL_RATE_K,
            completion_epsilon: defaults::COMPLETION_EPSILON,
            max_evaluations: defaults::FIT_MAX_EVALUATIONS,
            bounds: Bounds::default(),
        }
    }
}

impl Predictor {
    pub fn with_min_points(min_points: usize) -> Self {
        Self {
            min_points,
            ..Self::default()
        }
    }

    /// Fit the curve to a `(time, gravity)` series.
    ///
    /// Fewer than `min_points` plausible samples is `InsufficientData`; a
    /// fit that fails to converge is `Failed(NonConvergence)`. Neither is
    /// an error for the caller.
    pub fn predict(
        &self,
        series: &[(DateTime<Utc>, f64)],
        batch: &BatchContext,
        now: DateTime<Utc>,
    ) -> Evaluation<PredictionResult> {
        let mut clean: Vec<(DateTime<Utc>, f64)> = series
            .iter()
            .copied()
            .filter(|(_, g)| (defaults::GRAVITY_MIN..=defaults::GRAVITY_MAX).contains(g))
            .collect();
        clean.sort_by_key(|(t, _)| *t);

        if clean.len() < self.min_points {
            return Evaluation::insufficient(format!(
                "{} plausible points, need {}",
                clean.len(),
                self.min_points
            ));
        }

        let start = clean[0].0;
        let hours: Vec<f64> = clean
            .iter()
            .map(|(t, _)| (*t - start).num_milliseconds() as f64 / 3_600_000.0)
            .collect();
        let raw: Vec<f64> = clean.iter().map(|(_, g)| *g).collect();
        let smooth = median_filter(&raw, self.median_window);

        let guess = self.initial_guess(&hours, &smooth, batch);
        debug!(
            l = guess.l,
            k = guess.k,
            t0 = guess.t0,
            c = guess.c,
            points = smooth.len(),
            "Fitting fermentation curve"
        );

        let report = match fit_logistic(&hours, &smooth, guess, &self.bounds, self.max_evaluations) {
            Ok(r) => r,
            Err(e) => return Evaluation::failed(FailureKind::NonConvergence, e.to_string()),
        };

        let params = report.params;
        if !params.c.is_finite() {
            return Evaluation::failed(FailureKind::NonConvergence, "non-finite asymptote");
        }

        let completion = params
            .completion_hour(self.completion_epsilon)
            .and_then(|h| {
                let ms = (h * 3_600_000.0).round();
                (ms < i64::MAX as f64).then(|| start + Duration::milliseconds(ms as i64))
            });
        let days_remaining = completion.map(|c| (c - now).num_days().max(0));

        Evaluation::Ready(PredictionResult {
            predicted_fg: round3(params.c),
            completion,
            days_remaining,
            computed_at: now,
            params,
            points_used: smooth.len(),
            sse: report.sse,
        })
    }

    fn initial_guess(&self, hours: &[f64], smooth: &[f64], batch: &BatchContext) -> LogisticParams {
        let min = smooth.iter().copied().fold(f64::INFINITY, f64::min);
        let max = smooth.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let (l, c) = match (batch.og, batch.expected_fg()) {
            (Some(og), Some(fg)) => (og - fg, fg),
            _ => (max - min, min),
        };

        // t0: time of the sample nearest the mid gravity
        let mid = max - (max - min) / 2.0;
        let t0 = smooth
            .iter()
            .zip(hours)
            .min_by(|(a, _), (b, _)| (*a - mid).abs().total_cmp(&(*b - mid).abs()))
            .map_or(48.0, |(_, h)| *h);
        let t0 = if t0 < 0.0 { 24.0 } else { t0 };

        LogisticParams { l, k: self.initial_k, t0, c }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
