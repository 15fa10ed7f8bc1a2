//! Bounded Levenberg-Marquardt fit of the four-parameter logistic decay
//!
//! `y(t) = C + L / (1 + exp(k·(t − t0)))`
//!
//! Parameters are kept inside their box by projecting every trial step onto
//! the bounds. Damping uses Marquardt's diagonal scaling so the very
//! different parameter magnitudes (L ~ 0.05, t0 ~ 100) don't need manual
//! rescaling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fitted (or guessed) logistic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Total drop
    pub l: f64,
    /// Rate, 1/hour
    pub k: f64,
    /// Inflection time, hours since the first sample
    pub t0: f64,
    /// Terminal value (asymptote)
    pub c: f64,
}

impl LogisticParams {
    const fn to_array(self) -> [f64; 4] {
        [self.l, self.k, self.t0, self.c]
    }

    const fn from_array(p: [f64; 4]) -> Self {
        Self { l: p[0], k: p[1], t0: p[2], c: p[3] }
    }

    /// Model value at `t` hours.
    pub fn eval(&self, t: f64) -> f64 {
        self.c + self.l * sigmoid(self.k * (t - self.t0))
    }

    /// Hour at which the model is within `epsilon` of `C`.
    ///
    /// Solves `L / (1 + exp(k(t − t0))) = epsilon`. `None` when no such
    /// finite, non-negative hour exists.
    pub fn completion_hour(&self, epsilon: f64) -> Option<f64> {
        if self.k <= 0.0 || self.l <= epsilon || epsilon <= 0.0 {
            return None;
        }
        let hour = self.t0 + (self.l / epsilon - 1.0).ln() / self.k;
        (hour.is_finite() && hour >= 0.0).then_some(hour)
    }
}

/// `1 / (1 + e^z)` without overflow for large |z|.
fn sigmoid(z: f64) -> f64 {
    if z > 0.0 {
        let e = (-z).exp();
        e / (1.0 + e)
    } else {
        1.0 / (1.0 + z.exp())
    }
}

/// Box constraints, same order as [`LogisticParams`] (L, k, t0, C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            lower: [0.0, 0.0, 0.0, 0.900],
            upper: [0.2, 5.0, 1000.0, 1.200],
        }
    }
}

impl Bounds {
    fn project(&self, p: [f64; 4]) -> [f64; 4] {
        let mut out = p;
        for (i, v) in out.iter_mut().enumerate() {
            *v = v.clamp(self.lower[i], self.upper[i]);
        }
        out
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("need at least 4 points to fit 4 parameters, got {0}")]
    TooFewPoints(usize),

    #[error("time and value series differ in length ({0} vs {1})")]
    LengthMismatch(usize, usize),

    #[error("initial guess produces non-finite residuals")]
    NonFinite,

    #[error("no convergence within {0} function evaluations")]
    MaxEvaluations(usize),
}

/// Result of a successful fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub params: LogisticParams,
    /// Sum of squared residuals at the solution
    pub sse: f64,
    pub evaluations: usize,
}

const INITIAL_LAMBDA: f64 = 1e-3;
const MAX_LAMBDA: f64 = 1e12;
const MIN_LAMBDA: f64 = 1e-12;
/// Relative SSE improvement below which the fit has converged.
const F_TOLERANCE: f64 = 1e-12;
/// Absolute SSE at which the data is matched exactly.
const SSE_FLOOR: f64 = 1e-24;

fn sse(t: &[f64], y: &[f64], p: [f64; 4]) -> f64 {
    let params = LogisticParams::from_array(p);
    let total: f64 = t
        .iter()
        .zip(y)
        .map(|(ti, yi)| {
            let r = yi - params.eval(*ti);
            r * r
        })
        .sum();
    if total.is_finite() { total } else { f64::INFINITY }
}

/// Normal equations `JᵀJ` and `Jᵀr` at `p`.
fn normal_equations(t: &[f64], y: &[f64], p: [f64; 4]) -> ([[f64; 4]; 4], [f64; 4]) {
    let params = LogisticParams::from_array(p);
    let mut jtj = [[0.0; 4]; 4];
    let mut jtr = [0.0; 4];

    for (ti, yi) in t.iter().zip(y) {
        let s = sigmoid(params.k * (ti - params.t0));
        let ds = s * (1.0 - s);
        let row = [
            s,
            -params.l * (ti - params.t0) * ds,
            params.l * params.k * ds,
            1.0,
        ];
        let r = yi - params.eval(*ti);
        for a in 0..4 {
            jtr[a] += row[a] * r;
            for b in 0..4 {
                jtj[a][b] += row[a] * row[b];
            }
        }
    }
    (jtj, jtr)
}

/// Solve the 4×4 system `a·x = b` by Gaussian elimination with partial
/// pivoting. `None` if the matrix is singular.
fn solve4(mut a: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot = (col..4).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..4 {
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; 4];
    for row in (0..4).rev() {
        let tail: f64 = ((row + 1)..4).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Fit the logistic model to `(t, y)` starting from `initial`.
///
/// Stops when an accepted step improves SSE by less than a relative
/// tolerance, when no step can improve it any more (damping saturates),
/// or fails after `max_evaluations` model evaluations.
pub fn fit_logistic(
    t: &[f64],
    y: &[f64],
    initial: LogisticParams,
    bounds: &Bounds,
    max_evaluations: usize,
) -> Result<FitReport, FitError> {
    if t.len() != y.len() {
        return Err(FitError::LengthMismatch(t.len(), y.len()));
    }
    if t.len() < 4 {
        return Err(FitError::TooFewPoints(t.len()));
    }

    let mut p = bounds.project(initial.to_array());
    let mut current = sse(t, y, p);
    let mut evaluations = 1;
    if !current.is_finite() {
        return Err(FitError::NonFinite);
    }

    let mut lambda = INITIAL_LAMBDA;
    let done = |p: [f64; 4], sse: f64, evaluations: usize| {
        Ok(FitReport {
            params: LogisticParams::from_array(p),
            sse,
            evaluations,
        })
    };

    loop {
        if current <= SSE_FLOOR {
            return done(p, current, evaluations);
        }

        let (jtj, jtr) = normal_equations(t, y, p);

        // Increase damping until a step improves the fit
        loop {
            if evaluations >= max_evaluations {
                return Err(FitError::MaxEvaluations(evaluations));
            }
            if lambda > MAX_LAMBDA {
                // No descent direction left inside the box
                return done(p, current, evaluations);
            }

            let mut damped = jtj;
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += lambda * jtj[i][i].max(1e-12);
            }

            let Some(delta) = solve4(damped, jtr) else {
                lambda *= 10.0;
                continue;
            };

            let mut trial = p;
            for (v, d) in trial.iter_mut().zip(delta) {
                *v += d;
            }
            let trial = bounds.project(trial);
            let trial_sse = sse(t, y, trial);
            evaluations += 1;

            if trial_sse < current {
                let improvement = (current - trial_sse) / current;
                p = trial;
                current = trial_sse;
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                if improvement < F_TOLERANCE {
                    return done(p, current, evaluations);
                }
                break;
            }
            lambda *= 10.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(truth: LogisticParams, hours: usize) -> (Vec<f64>, Vec<f64>) {
        let t: Vec<f64> = (0..hours).map(|h| h as f64).collect();
        let y = t.iter().map(|ti| truth.eval(*ti)).collect();
        (t, y)
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!((sigmoid(1000.0)).abs() < 1e-300);
        assert!((sigmoid(-1000.0) - 1.0).abs() < 1e-15);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn completion_hour_closed_form() {
        let p = LogisticParams { l: 0.04, k: 0.1, t0: 72.0, c: 1.010 };
        let h = p.completion_hour(0.001).unwrap();
        assert!((h - (72.0 + 39.0_f64.ln() / 0.1)).abs() < 1e-9);
        // residual drop at that hour is exactly epsilon
        assert!((p.eval(h) - p.c - 0.001).abs() < 1e-12);
    }

    #[test]
    fn completion_hour_degenerate_params() {
        let flat = LogisticParams { l: 0.0005, k: 0.1, t0: 10.0, c: 1.010 };
        assert!(flat.completion_hour(0.001).is_none());
        let no_rate = LogisticParams { l: 0.04, k: 0.0, t0: 10.0, c: 1.010 };
        assert!(no_rate.completion_hour(0.001).is_none());
        let past = LogisticParams { l: 0.04, k: 5.0, t0: 0.0, c: 1.010 };
        assert!(past.completion_hour(0.001).unwrap() >= 0.0);
    }

    #[test]
    fn recovers_synthetic_parameters() {
        let truth = LogisticParams { l: 0.04, k: 0.1, t0: 72.0, c: 1.010 };
        let (t, y) = synthetic(truth, 201);
        let guess = LogisticParams { l: 0.04, k: 0.5, t0: 72.0, c: 1.010 };

        let report = fit_logistic(&t, &y, guess, &Bounds::default(), 20_000).unwrap();
        let p = report.params;
        assert!((p.c - truth.c).abs() < 1e-4, "C = {}", p.c);
        assert!((p.l - truth.l).abs() < 1e-3, "L = {}", p.l);
        assert!((p.k - truth.k).abs() < 5e-3, "k = {}", p.k);
        assert!((p.t0 - truth.t0).abs() < 0.5, "t0 = {}", p.t0);
    }

    #[test]
    fn solution_respects_bounds() {
        // Rise instead of decay: best fit would need L < 0
        let t: Vec<f64> = (0..60).map(f64::from).collect();
        let y: Vec<f64> = t.iter().map(|ti| 1.000 + 0.0005 * ti).collect();
        let guess = LogisticParams { l: 0.03, k: 0.5, t0: 30.0, c: 1.000 };
        let bounds = Bounds::default();

        let report = fit_logistic(&t, &y, guess, &bounds, 20_000).unwrap();
        let p = report.params.to_array();
        for i in 0..4 {
            assert!(p[i] >= bounds.lower[i] && p[i] <= bounds.upper[i]);
        }
    }

    #[test]
    fn too_few_points() {
        let guess = LogisticParams { l: 0.03, k: 0.5, t0: 1.0, c: 1.0 };
        let err = fit_logistic(&[0.0, 1.0], &[1.0, 1.0], guess, &Bounds::default(), 100).unwrap_err();
        assert_eq!(err, FitError::TooFewPoints(2));
    }

    #[test]
    fn evaluation_cap_is_enforced() {
        let truth = LogisticParams { l: 0.04, k: 0.1, t0: 72.0, c: 1.010 };
        let (t, y) = synthetic(truth, 201);
        let guess = LogisticParams { l: 0.01, k: 4.0, t0: 10.0, c: 1.100 };
        let err = fit_logistic(&t, &y, guess, &Bounds::default(), 3).unwrap_err();
        assert!(matches!(err, FitError::MaxEvaluations(_)));
    }

    #[test]
    fn solve4_identity() {
        let mut a = [[0.0; 4]; 4];
        for (i, row) in a.iter_mut().enumerate() {
            row[i] = 2.0;
        }
        let x = solve4(a, [2.0, 4.0, 6.0, 8.0]).unwrap();
        assert_eq!(x, [1.0, 2.0, 3.0, 4.0]);
        assert!(solve4([[0.0; 4]; 4], [1.0; 4]).is_none());
    }
}
