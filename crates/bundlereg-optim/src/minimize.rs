use serde::{Deserialize, Serialize};

use crate::{lbfgsb, powell, LBfgsBOptions, OptimError, PowellOptions};

/// Result of a minimization.
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    /// Best parameters found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    /// Number of objective evaluations.
    pub nfev: usize,
    /// Number of iterations performed.
    pub nit: usize,
    /// The parameters after every iteration, if requested.
    pub history: Option<Vec<Vec<f64>>>,
    /// Whether a convergence criterion was met before the budget was exhausted.
    pub converged: bool,
    /// Human readable reason for termination.
    pub message: String,
}

/// The minimization algorithm and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// Bounded limited-memory BFGS with finite-difference gradients.
    LBfgsB(LBfgsBOptions),
    /// Powell's direction-set method. Bounds are ignored.
    Powell(PowellOptions),
}

impl Method {
    /// Canonical name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            Method::LBfgsB(_) => "L-BFGS-B",
            Method::Powell(_) => "Powell",
        }
    }

    /// Whether the method honors box bounds.
    pub fn supports_bounds(&self) -> bool {
        matches!(self, Method::LBfgsB(_))
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::LBfgsB(LBfgsBOptions::default())
    }
}

impl std::str::FromStr for Method {
    type Err = OptimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L-BFGS-B" | "L_BFGS_B" | "l-bfgs-b" | "lbfgsb" => {
                Ok(Method::LBfgsB(LBfgsBOptions::default()))
            }
            "Powell" | "powell" => Ok(Method::Powell(PowellOptions::default())),
            _ => Err(OptimError::UnknownMethod(s.to_string())),
        }
    }
}

/// Objective wrapper counting the evaluations.
pub(crate) struct Objective<F> {
    f: F,
    pub(crate) nfev: usize,
}

impl<F: FnMut(&[f64]) -> f64> Objective<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f, nfev: 0 }
    }

    pub(crate) fn eval(&mut self, x: &[f64]) -> f64 {
        self.nfev += 1;
        (self.f)(x)
    }
}

/// Minimize a scalar function of a parameter vector.
///
/// # Arguments
///
/// * `f` - The objective.
/// * `x0` - The starting point.
/// * `method` - The algorithm and its options.
/// * `bounds` - Optional `(lower, upper)` box per parameter, used only by L-BFGS-B.
/// * `track_history` - Record the parameters after every iteration.
///
/// # Returns
///
/// The best point found. Running out of iterations is not an error, see
/// [`OptimizeResult::converged`].
///
/// Example:
///
/// ```
/// use bundlereg_optim::{minimize, Method};
///
/// let f = |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2);
/// let res = minimize(f, &[0.0, 0.0], &Method::default(), None, false).unwrap();
/// assert!((res.x[0] - 1.0).abs() < 1e-3);
/// ```
pub fn minimize<F>(
    f: F,
    x0: &[f64],
    method: &Method,
    bounds: Option<&[(f64, f64)]>,
    track_history: bool,
) -> Result<OptimizeResult, OptimError>
where
    F: FnMut(&[f64]) -> f64,
{
    if x0.is_empty() {
        return Err(OptimError::EmptyParameters);
    }

    if let Some(bounds) = bounds {
        if bounds.len() != x0.len() {
            return Err(OptimError::BoundsMismatch {
                expected: x0.len(),
                actual: bounds.len(),
            });
        }
        for (index, &(lower, upper)) in bounds.iter().enumerate() {
            if lower > upper || lower.is_nan() || upper.is_nan() {
                return Err(OptimError::InvalidBounds {
                    index,
                    lower,
                    upper,
                });
            }
        }
    }

    let mut objective = Objective::new(f);
    let result = match method {
        Method::LBfgsB(options) => {
            lbfgsb::minimize_lbfgsb(&mut objective, x0, bounds, options, track_history)
        }
        Method::Powell(options) => {
            if bounds.is_some() {
                log::debug!("Powell ignores parameter bounds");
            }
            powell::minimize_powell(&mut objective, x0, options, track_history)
        }
    };

    log::debug!(
        "{} finished: fun={} nit={} nfev={} ({})",
        method.name(),
        result.fun,
        result.nit,
        result.nfev,
        result.message
    );

    Ok(result)
}
