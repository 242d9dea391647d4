use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::minimize::{Objective, OptimizeResult};

/// L-BFGS-B configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LBfgsBOptions {
    /// Number of correction pairs kept in the limited memory.
    pub maxcor: usize,
    /// Stop when the relative reduction of the objective falls below this value.
    pub ftol: f64,
    /// Stop when the largest projected gradient component falls below this value.
    pub gtol: f64,
    /// Step used for the finite-difference gradient.
    pub eps: f64,
    /// Maximum number of iterations.
    pub maxiter: usize,
    /// Maximum number of objective evaluations.
    pub maxfun: usize,
}

impl Default for LBfgsBOptions {
    fn default() -> Self {
        Self {
            maxcor: 10,
            ftol: 1e-7,
            gtol: 1e-5,
            eps: 1e-8,
            maxiter: 100,
            maxfun: 15000,
        }
    }
}

/// Armijo sufficient decrease constant.
const ARMIJO_C1: f64 = 1e-4;
/// Maximum number of step halvings in the line search.
const MAX_BACKTRACKS: usize = 40;
/// Curvature pairs with `s.y` below this are discarded.
const CURVATURE_EPS: f64 = 1e-10;

fn project(x: &mut [f64], bounds: Option<&[(f64, f64)]>) {
    if let Some(bounds) = bounds {
        for (xi, &(lo, hi)) in x.iter_mut().zip(bounds.iter()) {
            *xi = xi.clamp(lo, hi);
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn inf_norm(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| m.max(v.abs()))
}

// forward differences, stepping backwards when the forward step would leave the box
fn gradient<F: FnMut(&[f64]) -> f64>(
    objective: &mut Objective<F>,
    x: &[f64],
    fx: f64,
    eps: f64,
    bounds: Option<&[(f64, f64)]>,
) -> Vec<f64> {
    let mut xh = x.to_vec();
    let mut g = vec![0.0; x.len()];
    for i in 0..x.len() {
        let h = match bounds {
            Some(b) if x[i] + eps > b[i].1 => -eps,
            _ => eps,
        };
        xh[i] = x[i] + h;
        g[i] = (objective.eval(&xh) - fx) / h;
        xh[i] = x[i];
    }
    g
}

// components pinned at a bound by the gradient direction
fn fixed_mask(x: &[f64], g: &[f64], bounds: Option<&[(f64, f64)]>) -> Vec<bool> {
    match bounds {
        None => vec![false; x.len()],
        Some(b) => x
            .iter()
            .zip(g.iter())
            .zip(b.iter())
            .map(|((&xi, &gi), &(lo, hi))| (xi <= lo && gi > 0.0) || (xi >= hi && gi < 0.0))
            .collect(),
    }
}

// -H g by the two-loop recursion over the free variables
fn search_direction(
    g: &[f64],
    fixed: &[bool],
    memory: &VecDeque<(Vec<f64>, Vec<f64>)>,
) -> Vec<f64> {
    let mut q: Vec<f64> = g
        .iter()
        .zip(fixed.iter())
        .map(|(&gi, &f)| if f { 0.0 } else { gi })
        .collect();

    let mut alphas = Vec::with_capacity(memory.len());
    for (s, y) in memory.iter().rev() {
        let rho = 1.0 / dot(y, s);
        let alpha = rho * dot(s, &q);
        for (qi, yi) in q.iter_mut().zip(y.iter()) {
            *qi -= alpha * yi;
        }
        alphas.push((alpha, rho));
    }

    let gamma = match memory.back() {
        Some((s, y)) => dot(s, y) / dot(y, y),
        None => 1.0,
    };
    for qi in q.iter_mut() {
        *qi *= gamma;
    }

    for ((s, y), (alpha, rho)) in memory.iter().zip(alphas.iter().rev()) {
        let beta = rho * dot(y, &q);
        for (qi, si) in q.iter_mut().zip(s.iter()) {
            *qi += (alpha - beta) * si;
        }
    }

    q.iter()
        .zip(fixed.iter())
        .map(|(&qi, &f)| if f { 0.0 } else { -qi })
        .collect()
}

/// Minimize with a projected limited-memory BFGS.
///
/// The gradient is estimated with finite differences of step `options.eps`. Every trial
/// point is projected into the box `bounds` before being evaluated.
pub(crate) fn minimize_lbfgsb<F: FnMut(&[f64]) -> f64>(
    objective: &mut Objective<F>,
    x0: &[f64],
    bounds: Option<&[(f64, f64)]>,
    options: &LBfgsBOptions,
    track_history: bool,
) -> OptimizeResult {
    let mut x = x0.to_vec();
    project(&mut x, bounds);

    let mut fx = objective.eval(&x);
    let mut g = gradient(objective, &x, fx, options.eps, bounds);

    let mut memory: VecDeque<(Vec<f64>, Vec<f64>)> = VecDeque::with_capacity(options.maxcor);
    let mut history = track_history.then(Vec::new);
    let mut nit = 0;
    let mut converged = false;
    let mut message = String::from("maximum number of iterations reached");

    while nit < options.maxiter {
        // projected gradient
        let mut pg: Vec<f64> = x.iter().zip(g.iter()).map(|(xi, gi)| xi - gi).collect();
        project(&mut pg, bounds);
        for (pgi, xi) in pg.iter_mut().zip(x.iter()) {
            *pgi -= xi;
        }
        if inf_norm(&pg) <= options.gtol {
            converged = true;
            message = String::from("projected gradient below tolerance");
            break;
        }

        if objective.nfev >= options.maxfun {
            message = String::from("maximum number of function evaluations reached");
            break;
        }

        let fixed = fixed_mask(&x, &g, bounds);
        let mut d = search_direction(&g, &fixed, &memory);
        if dot(&d, &g) >= 0.0 {
            log::debug!("L-BFGS-B: resetting memory, direction is not a descent direction");
            memory.clear();
            d = search_direction(&g, &fixed, &memory);
        }

        // without curvature information take a cautious first step
        let mut step = if memory.is_empty() {
            (1.0 / inf_norm(&d).max(1e-12)).min(1.0)
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let mut trial: Vec<f64> =
                x.iter().zip(d.iter()).map(|(xi, di)| xi + step * di).collect();
            project(&mut trial, bounds);
            let delta: Vec<f64> = trial.iter().zip(x.iter()).map(|(t, xi)| t - xi).collect();
            let decrease = dot(&g, &delta);
            let f_trial = objective.eval(&trial);
            if f_trial <= fx + ARMIJO_C1 * decrease && decrease < 0.0 {
                accepted = Some((trial, delta, f_trial));
                break;
            }
            step *= 0.5;
        }

        let (x_new, s, f_new) = match accepted {
            Some(a) => a,
            None if !memory.is_empty() => {
                log::debug!("L-BFGS-B: line search failed, restarting from steepest descent");
                memory.clear();
                continue;
            }
            None => {
                message = String::from("line search could not find a lower value");
                break;
            }
        };

        let g_new = gradient(objective, &x_new, f_new, options.eps, bounds);
        let y: Vec<f64> = g_new.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
        if options.maxcor > 0 && dot(&s, &y) > CURVATURE_EPS {
            if memory.len() == options.maxcor {
                memory.pop_front();
            }
            memory.push_back((s, y));
        }

        let reduction = (fx - f_new) / fx.abs().max(f_new.abs()).max(1.0);

        x = x_new;
        fx = f_new;
        g = g_new;
        nit += 1;

        log::debug!("L-BFGS-B iteration {}: f={}", nit, fx);

        if let Some(history) = history.as_mut() {
            history.push(x.clone());
        }

        if reduction <= options.ftol {
            converged = true;
            message = String::from("relative reduction of f below tolerance");
            break;
        }
    }

    OptimizeResult {
        x,
        fun: fx,
        nfev: objective.nfev,
        nit,
        history,
        converged,
        message,
    }
}
