//! Bounded Nelder-Mead simplex minimizer.
//!
//! Box constraints are enforced by projecting every trial point onto the
//! bounds. Non-finite objective values are treated as `+inf`.

use super::OptimizationStatus;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct NelderMead {
    pub xtol_rel: f64,
    pub ftol_rel: f64,
    pub max_evaluations: usize,
}

/// Best point found by a minimization run.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub status: OptimizationStatus,
}

impl NelderMead {
    /// Minimize `f` over the box `[lower, upper]` starting from `x0`.
    ///
    /// `step` sets the initial simplex size along each coordinate.
    pub fn minimize<F>(
        &self,
        mut f: F,
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
        step: &[f64],
    ) -> Minimum
    where
        F: FnMut(&[f64]) -> f64,
    {
        let n = x0.len();
        let project = |x: &mut [f64]| {
            for i in 0..n {
                x[i] = x[i].clamp(lower[i], upper[i]);
            }
        };
        let mut evaluations = 0;
        let mut eval = |x: &[f64], count: &mut usize| {
            *count += 1;
            let v = f(x);
            if v.is_finite() { v } else { f64::INFINITY }
        };

        let mut start = x0.to_vec();
        project(&mut start);
        let f0 = eval(&start, &mut evaluations);
        if !f0.is_finite() {
            return Minimum {
                x: start,
                value: f0,
                evaluations: 1,
                status: OptimizationStatus::Failure,
            };
        }
        if n == 0 {
            return Minimum {
                x: start,
                value: f0,
                evaluations: 1,
                status: OptimizationStatus::Converged,
            };
        }

        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
        simplex.push((start.clone(), f0));
        for i in 0..n {
            let mut x = start.clone();
            x[i] += step[i];
            if x[i] > upper[i] {
                x[i] = start[i] - step[i];
            }
            project(&mut x);
            let v = eval(&x, &mut evaluations);
            simplex.push((x, v));
        }

        let status = loop {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            if self.converged(&simplex) {
                break OptimizationStatus::Converged;
            }
            if evaluations >= self.max_evaluations {
                break OptimizationStatus::MaxEvaluations;
            }

            let mut centroid = vec![0.0; n];
            for (x, _) in &simplex[..n] {
                for i in 0..n {
                    centroid[i] += x[i] / n as f64;
                }
            }
            let worst = simplex[n].clone();
            let along = |t: f64, from: &[f64]| {
                let mut x: Vec<f64> = (0..n)
                    .map(|i| centroid[i] + t * (centroid[i] - from[i]))
                    .collect();
                project(&mut x);
                x
            };

            let xr = along(REFLECT, &worst.0);
            let fr = eval(&xr, &mut evaluations);
            if fr < simplex[0].1 {
                let xe = along(EXPAND, &worst.0);
                let fe = eval(&xe, &mut evaluations);
                simplex[n] = if fe < fr { (xe, fe) } else { (xr, fr) };
                continue;
            }
            if fr < simplex[n - 1].1 {
                simplex[n] = (xr, fr);
                continue;
            }

            let (xc, fc) = if fr < worst.1 {
                let xc = along(REFLECT * CONTRACT, &worst.0);
                let fc = eval(&xc, &mut evaluations);
                (xc, fc)
            } else {
                let xc = along(-CONTRACT, &worst.0);
                let fc = eval(&xc, &mut evaluations);
                (xc, fc)
            };
            if fc < fr.min(worst.1) {
                simplex[n] = (xc, fc);
                continue;
            }

            let best = simplex[0].0.clone();
            for vertex in simplex.iter_mut().skip(1) {
                let mut x: Vec<f64> = (0..n)
                    .map(|i| best[i] + SHRINK * (vertex.0[i] - best[i]))
                    .collect();
                project(&mut x);
                let v = eval(&x, &mut evaluations);
                *vertex = (x, v);
            }
        };

        let (x, value) = simplex.swap_remove(0);
        Minimum {
            x,
            value,
            evaluations,
            status,
        }
    }

    fn converged(&self, simplex: &[(Vec<f64>, f64)]) -> bool {
        let (best, f_best) = &simplex[0];
        let f_worst = simplex[simplex.len() - 1].1;
        let f_ok = (f_worst - f_best).abs() <= self.ftol_rel * (1.0 + f_best.abs());
        let x_ok = simplex.iter().skip(1).all(|(x, _)| {
            x.iter()
                .zip(best)
                .all(|(xi, bi)| (xi - bi).abs() <= self.xtol_rel * (1.0 + bi.abs()))
        });
        f_ok && x_ok
    }
}
