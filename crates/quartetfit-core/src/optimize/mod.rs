//! Numerical fitting: network branch lengths and Dirichlet concentration.
//!
//! Both fits minimize a negative log-likelihood with a bounded Nelder-Mead
//! simplex search and report a [`OptimizationStatus`] so the caller can apply
//! its failure policy.

mod branch_lengths;
mod concentration;
mod nelder_mead;

use std::fmt;

use serde::Serialize;

pub use branch_lengths::{BranchLengthFit, optimize_branch_lengths, pseudo_deviance};
pub use concentration::{ALPHA_BOUNDS, ConcentrationFit, fit_concentration};
pub use nelder_mead::{Minimum, NelderMead};

/// Termination status of an optimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Simplex shrank below the x and f tolerances.
    Converged,
    /// Evaluation budget exhausted before convergence.
    MaxEvaluations,
    /// Objective not finite at the starting point.
    Failure,
}

impl OptimizationStatus {
    pub fn is_converged(self) -> bool {
        self == Self::Converged
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::MaxEvaluations => write!(f, "max_evaluations"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Tolerances and bounds shared by the optimizers.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerConfig {
    /// Relative tolerance on parameter values.
    pub xtol_rel: f64,
    /// Relative tolerance on the objective.
    pub ftol_rel: f64,
    pub max_evaluations: usize,
    /// Upper bound on optimized branch lengths (coalescent units).
    pub bl_upper: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            xtol_rel: 1e-6,
            ftol_rel: 1e-8,
            max_evaluations: 5000,
            bl_upper: 10.0,
        }
    }
}

impl OptimizerConfig {
    pub(crate) fn nelder_mead(&self) -> NelderMead {
        NelderMead {
            xtol_rel: self.xtol_rel,
            ftol_rel: self.ftol_rel,
            max_evaluations: self.max_evaluations,
        }
    }
}
