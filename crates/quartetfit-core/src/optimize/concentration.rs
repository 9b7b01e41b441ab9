//! Dirichlet concentration fit for the TICR test.
//!
//! Observed CF vectors are modelled as independent draws from
//! Dirichlet(α · expected CF). α is fitted on the log scale.

use serde::Serialize;

use quartetfit_stats::{dirichlet_pseudo_loglik, substitute_zeros};

use super::{OptimizationStatus, OptimizerConfig};

/// Search interval for α.
pub const ALPHA_BOUNDS: (f64, f64) = (1e-4, 1e6);

/// Fitted concentration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConcentrationFit {
    /// Maximized Dirichlet pseudo-log-likelihood.
    pub loglik: f64,
    pub alpha: f64,
    pub status: OptimizationStatus,
}

/// Maximum pseudo-likelihood α given observed and expected CFs.
///
/// Observed zeros are replaced before fitting; the search starts at α = 1.
pub fn fit_concentration(
    obs: &[[f64; 3]],
    exp: &[[f64; 3]],
    config: &OptimizerConfig,
) -> ConcentrationFit {
    let obs = substitute_zeros(obs, exp);
    let lower = [ALPHA_BOUNDS.0.ln()];
    let upper = [ALPHA_BOUNDS.1.ln()];
    let minimum = config.nelder_mead().minimize(
        |x| -dirichlet_pseudo_loglik(&obs, exp, x[0].exp()),
        &[0.0],
        &lower,
        &upper,
        &[1.0],
    );
    let alpha = minimum.x[0].exp();
    log::debug!(
        "concentration fit: alpha {alpha:.4}, loglik {:.6}, {}",
        -minimum.value,
        minimum.status
    );
    ConcentrationFit {
        loglik: -minimum.value,
        alpha,
        status: minimum.status,
    }
}
