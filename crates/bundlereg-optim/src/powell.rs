use serde::{Deserialize, Serialize};

use crate::line_search::{bracket, brent};
use crate::minimize::{Objective, OptimizeResult};

/// Powell configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowellOptions {
    /// Relative tolerance of the line minimizations (scaled by 100 internally).
    pub xtol: f64,
    /// Stop when the relative decrease of one sweep falls below this value.
    pub ftol: f64,
    /// Maximum number of sweeps over the direction set.
    pub maxiter: usize,
    /// Maximum number of objective evaluations, unbounded if `None`.
    pub maxfev: Option<usize>,
}

impl Default for PowellOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-6,
            ftol: 1e-6,
            maxiter: 1_000_000,
            maxfev: None,
        }
    }
}

// minimize along `direction` from `x`, returns the new value, point and displacement
fn line_minimize<F: FnMut(&[f64]) -> f64>(
    objective: &mut Objective<F>,
    x: &[f64],
    direction: &[f64],
    tol: f64,
) -> (f64, Vec<f64>, Vec<f64>) {
    let mut trial = x.to_vec();
    let mut phi = |alpha: f64| {
        for ((t, xi), di) in trial.iter_mut().zip(x.iter()).zip(direction.iter()) {
            *t = xi + alpha * di;
        }
        objective.eval(&trial)
    };
    let br = bracket(&mut phi, 0.0, 1.0);
    let (alpha, fret) = brent(&mut phi, br, tol);

    let displacement: Vec<f64> = direction.iter().map(|d| alpha * d).collect();
    let x_new = x.iter().zip(displacement.iter()).map(|(a, b)| a + b).collect();
    (fret, x_new, displacement)
}

/// Minimize with Powell's conjugate direction method.
///
/// Starting from the coordinate axes, every sweep minimizes along each direction in turn
/// and then replaces the direction of largest decrease by the overall displacement of the
/// sweep when that is predicted to help.
pub(crate) fn minimize_powell<F: FnMut(&[f64]) -> f64>(
    objective: &mut Objective<F>,
    x0: &[f64],
    options: &PowellOptions,
    track_history: bool,
) -> OptimizeResult {
    let n = x0.len();
    let line_tol = options.xtol * 100.0;
    let maxfev = options.maxfev.unwrap_or(usize::MAX);

    let mut directions: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut d = vec![0.0; n];
            d[i] = 1.0;
            d
        })
        .collect();

    let mut x = x0.to_vec();
    let mut fval = objective.eval(&x);
    let mut x1 = x.clone();
    let mut history = track_history.then(Vec::new);
    let mut nit = 0;
    let mut converged = false;
    let mut message = String::from("maximum number of iterations reached");

    loop {
        let fx = fval;
        let mut bigind = 0;
        let mut delta = 0.0;
        for (i, direction) in directions.iter().enumerate() {
            let fx2 = fval;
            let (f_new, x_new, _) = line_minimize(objective, &x, direction, line_tol);
            fval = f_new;
            x = x_new;
            if fx2 - fval > delta {
                delta = fx2 - fval;
                bigind = i;
            }
        }
        nit += 1;

        log::debug!("Powell iteration {}: f={}", nit, fval);

        if let Some(history) = history.as_mut() {
            history.push(x.clone());
        }

        let bound = options.ftol * (fx.abs() + fval.abs()) + 1e-20;
        if 2.0 * (fx - fval) <= bound {
            converged = true;
            message = String::from("relative decrease of f below tolerance");
            break;
        }
        if objective.nfev >= maxfev {
            message = String::from("maximum number of function evaluations reached");
            break;
        }
        if nit >= options.maxiter {
            break;
        }
        if fx.is_nan() && fval.is_nan() {
            message = String::from("objective is NaN");
            break;
        }

        // extrapolated point along the average direction of the sweep
        let sweep: Vec<f64> = x.iter().zip(x1.iter()).map(|(a, b)| a - b).collect();
        x1 = x.clone();
        let x2: Vec<f64> = x.iter().zip(sweep.iter()).map(|(a, b)| a + b).collect();
        let fx2 = objective.eval(&x2);

        if fx > fx2 {
            let mut t = 2.0 * (fx + fx2 - 2.0 * fval);
            let temp = fx - fval - delta;
            t *= temp * temp;
            let temp = fx - fx2;
            t -= delta * temp * temp;
            if t < 0.0 {
                let (f_new, x_new, displacement) = line_minimize(objective, &x, &sweep, line_tol);
                fval = f_new;
                x = x_new;
                if displacement.iter().any(|&v| v != 0.0) {
                    directions[bigind] = directions[n - 1].clone();
                    directions[n - 1] = displacement;
                }
            }
        }
    }

    OptimizeResult {
        x,
        fun: fval,
        nfev: objective.nfev,
        nit,
        history,
        converged,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{minimize, Method, OptimError};
    use approx::assert_relative_eq;

    #[test]
    fn test_powell_quadratic() -> Result<(), OptimError> {
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2) + 0.5 * x[0] * x[1];
        let res = minimize(f, &[0.0, 0.0], &Method::Powell(PowellOptions::default()), None, true)?;
        assert!(res.converged);
        // gradient of the coupled quadratic vanishes at the minimum
        let gx = 2.0 * (res.x[0] - 1.0) + 0.5 * res.x[1];
        let gy = 2.0 * (res.x[1] - 2.0) + 0.5 * res.x[0];
        assert!(gx.abs() < 5e-3 && gy.abs() < 5e-3);
        assert_eq!(res.history.map(|h| h.len()), Some(res.nit));
        Ok(())
    }

    #[test]
    fn test_powell_rosenbrock() -> Result<(), OptimError> {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let method = Method::Powell(PowellOptions::default());
        let res = minimize(f, &[-1.2, 1.0], &method, None, false)?;
        assert_relative_eq!(res.x[0], 1.0, epsilon = 1e-2);
        assert_relative_eq!(res.x[1], 1.0, epsilon = 2e-2);
        Ok(())
    }

    #[test]
    fn test_powell_iteration_budget() -> Result<(), OptimError> {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let method = Method::Powell(PowellOptions {
            maxiter: 2,
            ..Default::default()
        });
        let res = minimize(f, &[-1.2, 1.0], &method, None, false)?;
        assert_eq!(res.nit, 2);
        assert!(!res.converged);
        assert!(res.fun < f(&[-1.2, 1.0]));
        Ok(())
    }
}
