use serde::Serialize;
use tracing::{debug, warn};

pub const IRR_TOLERANCE: f64 = 1e-7;
pub const IRR_LOWER_BOUND: f64 = -0.9999;
pub const IRR_UPPER_BOUND: f64 = 10.0;
const IRR_INITIAL_ANNUAL_GUESS: f64 = 0.05;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SolveMethod {
    Newton,
    Bisection,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootSolution {
    pub root: f64,
    pub residual: f64,
    pub iterations: u32,
    pub method: SolveMethod,
    /// `false` when bisection ran out of iterations and `root` is the
    /// midpoint of the last bracket.
    pub converged: bool,
}

/// Newton's method with a bisection fallback on `[lower_bound, upper_bound]`.
#[derive(Debug, Clone, Copy)]
pub struct RootFinder {
    pub tolerance: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub newton_max_iterations: u32,
    pub bisection_max_iterations: u32,
    pub min_derivative: f64,
}

impl RootFinder {
    pub fn new(lower_bound: f64, upper_bound: f64, tolerance: f64) -> Self {
        Self {
            tolerance,
            lower_bound,
            upper_bound,
            newton_max_iterations: 100,
            bisection_max_iterations: 200,
            min_derivative: 1e-12,
        }
    }

    /// Newton iterations from `initial_guess`; abandons Newton when the
    /// derivative vanishes or a step leaves the domain, then bisects.
    ///
    /// Returns `None` when the bracket shows no sign change.
    pub fn solve<F, D>(&self, initial_guess: f64, value: F, derivative: D) -> Option<RootSolution>
    where
        F: Fn(f64) -> f64,
        D: Fn(f64) -> f64,
    {
        let mut x = initial_guess;
        for iteration in 1..=self.newton_max_iterations {
            let fx = value(x);
            if fx.abs() < self.tolerance {
                debug!(root = x, iterations = iteration, "newton converged");
                return Some(RootSolution {
                    root: x,
                    residual: fx,
                    iterations: iteration,
                    method: SolveMethod::Newton,
                    converged: true,
                });
            }

            let dfx = derivative(x);
            if !(dfx.abs() >= self.min_derivative) {
                debug!(x, dfx, "derivative too small, falling back to bisection");
                break;
            }
            let next = x - fx / dfx;
            if !next.is_finite() || next <= self.lower_bound {
                debug!(x, next, "newton step left the domain, falling back to bisection");
                break;
            }
            x = next;
        }

        self.bisect(&value)
    }

    /// Same as [`RootFinder::solve`] with a central-difference derivative.
    pub fn solve_numeric<F>(&self, initial_guess: f64, step: f64, value: F) -> Option<RootSolution>
    where
        F: Fn(f64) -> f64,
    {
        self.solve(initial_guess, &value, |x| numeric_derivative(&value, x, step))
    }

    fn bisect<F>(&self, value: &F) -> Option<RootSolution>
    where
        F: Fn(f64) -> f64,
    {
        let mut low = self.lower_bound;
        let mut high = self.upper_bound;
        let mut value_low = value(low);
        let value_high = value(high);

        for (bound, fx) in [(low, value_low), (high, value_high)] {
            if fx.abs() < self.tolerance {
                return Some(RootSolution {
                    root: bound,
                    residual: fx,
                    iterations: 0,
                    method: SolveMethod::Bisection,
                    converged: true,
                });
            }
        }
        if !(value_low * value_high <= 0.0) {
            debug!(low, high, value_low, value_high, "no sign change in bracket");
            return None;
        }

        for iteration in 1..=self.bisection_max_iterations {
            let mid = 0.5 * (low + high);
            let value_mid = value(mid);
            if value_mid.abs() < self.tolerance {
                debug!(root = mid, iterations = iteration, "bisection converged");
                return Some(RootSolution {
                    root: mid,
                    residual: value_mid,
                    iterations: iteration,
                    method: SolveMethod::Bisection,
                    converged: true,
                });
            }
            if value_low * value_mid < 0.0 {
                high = mid;
            } else {
                low = mid;
                value_low = value_mid;
            }
        }

        let mid = 0.5 * (low + high);
        let residual = value(mid);
        warn!(root = mid, residual, "bisection hit the iteration limit");
        Some(RootSolution {
            root: mid,
            residual,
            iterations: self.bisection_max_iterations,
            method: SolveMethod::Bisection,
            converged: false,
        })
    }
}

pub fn numeric_derivative<F>(value: &F, x: f64, step: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let h = step.abs().max(f64::EPSILON);
    (value(x + h) - value(x - h)) / (2.0 * h)
}

/// Net present value of per-period cash flows, the first undiscounted.
pub fn npv(cash_flows: &[f64], rate: f64) -> f64 {
    let growth = 1.0 + rate;
    cash_flows
        .iter()
        .enumerate()
        .map(|(t, cf)| cf / growth.powi(t as i32))
        .sum()
}

pub fn npv_derivative(cash_flows: &[f64], rate: f64) -> f64 {
    let growth = 1.0 + rate;
    cash_flows
        .iter()
        .enumerate()
        .skip(1)
        .map(|(t, cf)| -(t as f64) * cf / growth.powi(t as i32 + 1))
        .sum()
}

/// Annualized internal rate of return of evenly spaced cash flows.
///
/// `None` when the series is empty, has no sign change, or no root lies
/// in the search bracket.
pub fn solve_annualized_return(cash_flows: &[f64], periods_per_year: u32) -> Option<f64> {
    if cash_flows.is_empty() {
        return None;
    }
    let has_positive = cash_flows.iter().any(|&cf| cf > 0.0);
    let has_negative = cash_flows.iter().any(|&cf| cf < 0.0);
    if !has_positive || !has_negative {
        return None;
    }

    let periods = periods_per_year.max(1);
    let finder = RootFinder::new(IRR_LOWER_BOUND, IRR_UPPER_BOUND, IRR_TOLERANCE);
    let initial_guess = IRR_INITIAL_ANNUAL_GUESS / periods as f64;
    let Some(solution) = finder.solve(
        initial_guess,
        |rate| npv(cash_flows, rate),
        |rate| npv_derivative(cash_flows, rate),
    ) else {
        warn!(periods = cash_flows.len(), "no internal rate of return in bracket");
        return None;
    };

    Some((1.0 + solution.root).powi(periods as i32) - 1.0)
}

/// [`solve_annualized_return`] with `0.0` standing in for "no solution".
pub fn compute_annualized_return(cash_flows: &[f64], periods_per_year: u32) -> f64 {
    solve_annualized_return(cash_flows, periods_per_year).unwrap_or(0.0)
}
