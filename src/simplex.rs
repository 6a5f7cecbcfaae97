//! Nelder–Mead simplex minimization
//!
//! Derivative-free search used by every calibration routine in the crate.
//! The search never fails: it stops on tolerance or on its evaluation budget
//! and always hands back the best vertex seen.
//!
//! Non-finite objective values are ranked as `+inf`, so a vertex that lands
//! on a degenerate parameter (e.g. a forgetting factor of exactly 1) is simply
//! rejected by the simplex instead of poisoning the ordering.

use log::{debug, warn};

// ============================================================================
// SEARCH CONSTANTS
// ============================================================================

/// Reflection coefficient
const RHO: f64 = 1.0;
/// Expansion coefficient
const CHI: f64 = 2.0;
/// Contraction coefficient
const PSI: f64 = 0.5;
/// Shrink coefficient
const SIGMA: f64 = 0.5;
/// Relative perturbation of non-zero coordinates for the initial simplex
const NONZERO_DELTA: f64 = 0.05;
/// Absolute perturbation of zero coordinates for the initial simplex
const ZERO_DELTA: f64 = 0.00025;
/// Iteration budget per dimension
const ITERATIONS_PER_DIM: usize = 200;

/// Stopping criteria for [`minimize`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexOptions {
    /// Largest vertex spread (in parameter space) accepted as converged
    pub x_tolerance: f64,
    /// Largest objective spread accepted as converged
    pub f_tolerance: f64,
    /// Iteration cap; `None` means `200 * dimensions`
    pub max_iterations: Option<usize>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            x_tolerance: 1e-4,
            f_tolerance: 1e-4,
            max_iterations: None,
        }
    }
}

/// Best iterate found by [`minimize`]
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    /// False when the budget ran out before the tolerances were met
    pub converged: bool,
}

fn rank(value: f64) -> f64 {
    if value.is_nan() {
        f64::INFINITY
    } else {
        value
    }
}

fn affine(a: &[f64], wa: f64, b: &[f64], wb: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| wa * x + wb * y).collect()
}

/// Minimize `objective` starting from `x0`.
pub fn minimize<F>(mut objective: F, x0: &[f64], options: SimplexOptions) -> SimplexResult
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let max_iterations = options.max_iterations.unwrap_or(ITERATIONS_PER_DIM * n.max(1));
    let max_evaluations = max_iterations;

    let mut evaluations = 0usize;
    let mut eval = |x: &[f64], evaluations: &mut usize| -> f64 {
        *evaluations += 1;
        rank(objective(x))
    };

    if n == 0 {
        let value = eval(x0, &mut evaluations);
        return SimplexResult {
            x: Vec::new(),
            value,
            iterations: 0,
            evaluations,
            converged: true,
        };
    }

    // Initial simplex: x0 plus one perturbed vertex per dimension
    let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    vertices.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        if y[k] != 0.0 {
            y[k] *= 1.0 + NONZERO_DELTA;
        } else {
            y[k] = ZERO_DELTA;
        }
        vertices.push(y);
    }
    let mut values: Vec<f64> = vertices.iter().map(|v| eval(v, &mut evaluations)).collect();
    sort_simplex(&mut vertices, &mut values);

    let mut iterations = 0usize;
    let mut converged = false;

    while evaluations < max_evaluations && iterations < max_iterations {
        let x_spread = vertices[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&vertices[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|f| (f - values[0]).abs())
            .fold(0.0_f64, f64::max);
        if x_spread <= options.x_tolerance && f_spread <= options.f_tolerance {
            converged = true;
            break;
        }

        // Centroid of every vertex except the worst
        let mut centroid = vec![0.0; n];
        for v in &vertices[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let worst = vertices[n].clone();

        let reflected = affine(&centroid, 1.0 + RHO, &worst, -RHO);
        let f_reflected = eval(&reflected, &mut evaluations);

        let mut shrink = false;
        if f_reflected < values[0] {
            let expanded = affine(&centroid, 1.0 + RHO * CHI, &worst, -RHO * CHI);
            let f_expanded = eval(&expanded, &mut evaluations);
            if f_expanded < f_reflected {
                vertices[n] = expanded;
                values[n] = f_expanded;
            } else {
                vertices[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            vertices[n] = reflected;
            values[n] = f_reflected;
        } else if f_reflected < values[n] {
            let contracted = affine(&centroid, 1.0 + PSI * RHO, &worst, -PSI * RHO);
            let f_contracted = eval(&contracted, &mut evaluations);
            if f_contracted <= f_reflected {
                vertices[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        } else {
            let contracted = affine(&centroid, 1.0 - PSI, &worst, PSI);
            let f_contracted = eval(&contracted, &mut evaluations);
            if f_contracted < values[n] {
                vertices[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = vertices[0].clone();
            for j in 1..=n {
                vertices[j] = affine(&best, 1.0 - SIGMA, &vertices[j], SIGMA);
                values[j] = eval(&vertices[j], &mut evaluations);
            }
        }

        sort_simplex(&mut vertices, &mut values);
        iterations += 1;
    }

    if !converged {
        warn!(
            "[Simplex] Budget exhausted after {} iterations, returning best iterate (f={:.6})",
            iterations, values[0]
        );
    } else {
        debug!(
            "[Simplex] Converged in {} iterations, {} evaluations (f={:.6})",
            iterations, evaluations, values[0]
        );
    }

    SimplexResult {
        x: vertices.swap_remove(0),
        value: values[0],
        iterations,
        evaluations,
        converged,
    }
}

fn sort_simplex(vertices: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *vertices = order.iter().map(|&i| vertices[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}
