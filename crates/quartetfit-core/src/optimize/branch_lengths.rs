//! Branch-length and γ fitting by quartet pseudo-likelihood.
//!
//! The score is the pseudo-deviance `Σ_q Σ_j p̂ log(p̂ / p)` between observed
//! and expected CFs (zero for a perfect fit). Only parameters that change
//! expected CFs are optimized: lengths of edges above at least two taxa and
//! the γ of each hybrid node.

use crate::dataset::QuartetDataset;
use crate::error::{Error, Result};
use crate::expected::expected_cf;
use crate::network::Network;

use super::{OptimizationStatus, OptimizerConfig};

const LENGTH_STEP: f64 = 0.5;
const GAMMA_STEP: f64 = 0.1;
const DEFAULT_START_LENGTH: f64 = 1.0;

/// Result of [`optimize_branch_lengths`].
#[derive(Debug, Clone)]
pub struct BranchLengthFit {
    /// Copy of the input network carrying the fitted lengths, γ and score.
    pub network: Network,
    pub loglik: f64,
    pub status: OptimizationStatus,
    pub evaluations: usize,
    pub n_parameters: usize,
}

#[derive(Debug, Clone, Copy)]
enum Parameter {
    Length(usize),
    Gamma(usize),
}

/// Pseudo-deviance of `net` against the observed CFs of `dataset`.
pub fn pseudo_deviance(net: &Network, dataset: &QuartetDataset) -> Result<f64> {
    let quartets = resolve_quartets(net, dataset)?;
    deviance(net, &quartets)
}

fn resolve_quartets(net: &Network, dataset: &QuartetDataset) -> Result<Vec<([usize; 4], [f64; 3])>> {
    dataset
        .iter()
        .map(|record| {
            let mut taxa = [0usize; 4];
            for (slot, label) in taxa.iter_mut().zip(&record.taxa) {
                *slot = net.leaf(label).ok_or_else(|| {
                    Error::TaxonMismatch(format!("taxon '{label}' not in network"))
                })?;
            }
            Ok((taxa, record.obs_cf))
        })
        .collect()
}

fn deviance(net: &Network, quartets: &[([usize; 4], [f64; 3])]) -> Result<f64> {
    let mut total = 0.0;
    for (taxa, obs) in quartets {
        let exp = expected_cf(net, *taxa)?;
        for j in 0..3 {
            if obs[j] > 0.0 {
                total += obs[j] * (obs[j] / exp[j]).ln();
            }
        }
    }
    Ok(total)
}

/// Fit branch lengths and γ of a copy of `net` to the observed CFs.
///
/// Lengths are bounded to `[0, config.bl_upper]` and start from their current
/// value (1.0 when unknown); γ is bounded to `[0, 1]`. The caller decides what
/// to do with a non-converged status.
pub fn optimize_branch_lengths(
    net: &Network,
    dataset: &QuartetDataset,
    config: &OptimizerConfig,
) -> Result<BranchLengthFit> {
    let quartets = resolve_quartets(net, dataset)?;
    let below = net.descendant_leaf_counts();

    let mut params = Vec::new();
    for (e, edge) in net.edges().iter().enumerate() {
        if below[edge.child] >= 2 {
            params.push(Parameter::Length(e));
        }
    }
    for h in net.hybrid_nodes() {
        params.push(Parameter::Gamma(net.parent_edges(h)[0]));
    }

    let mut x0 = Vec::with_capacity(params.len());
    let mut lower = Vec::with_capacity(params.len());
    let mut upper = Vec::with_capacity(params.len());
    let mut step = Vec::with_capacity(params.len());
    for p in &params {
        match *p {
            Parameter::Length(e) => {
                let start = net.edge(e).length.unwrap_or(DEFAULT_START_LENGTH);
                x0.push(start.clamp(0.0, config.bl_upper));
                lower.push(0.0);
                upper.push(config.bl_upper);
                step.push(LENGTH_STEP);
            }
            Parameter::Gamma(e) => {
                x0.push(net.edge(e).gamma);
                lower.push(0.0);
                upper.push(1.0);
                step.push(GAMMA_STEP);
            }
        }
    }
    log::debug!(
        "optimizing {} parameters over {} four-taxon sets",
        params.len(),
        quartets.len()
    );

    let mut working = net.clone();
    let minimum = config.nelder_mead().minimize(
        |x| {
            if apply(&mut working, &params, x).is_err() {
                return f64::INFINITY;
            }
            deviance(&working, &quartets).unwrap_or(f64::INFINITY)
        },
        &x0,
        &lower,
        &upper,
        &step,
    );

    apply(&mut working, &params, &minimum.x)?;
    let loglik = deviance(&working, &quartets)?;
    working.loglik = Some(loglik);
    log::debug!(
        "branch-length fit: score {loglik:.6}, {} evaluations, {}",
        minimum.evaluations,
        minimum.status
    );

    Ok(BranchLengthFit {
        network: working,
        loglik,
        status: minimum.status,
        evaluations: minimum.evaluations,
        n_parameters: params.len(),
    })
}

fn apply(net: &mut Network, params: &[Parameter], x: &[f64]) -> Result<()> {
    for (p, &value) in params.iter().zip(x) {
        match *p {
            Parameter::Length(e) => net.set_length(e, Some(value)),
            Parameter::Gamma(e) => net.set_gamma(e, value)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::QuartetRecord;
    use crate::newick::parse_network;

    #[test]
    fn test_deviance_zero_at_truth() {
        let net = parse_network("((A:1,B:1):0.5,(C:1,D:1):0.5);").unwrap();
        let exp = crate::expected::expected_cf_by_label(&net, ["A", "B", "C", "D"]).unwrap();
        let data = QuartetDataset::new(vec![QuartetRecord::new(["A", "B", "C", "D"], exp, 100.0)]);
        assert!(pseudo_deviance(&net, &data).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_recovers_internal_length() {
        // only the edge above (A,B) changes the CFs of this four-taxon set
        let truth = parse_network("(((A:1,B:1):0.8,C:1):0.5,D:1.5);").unwrap();
        let labels = ["A", "B", "C", "D"];
        let exp = crate::expected::expected_cf_by_label(&truth, labels).unwrap();
        let data = QuartetDataset::new(vec![QuartetRecord::new(labels, exp, 100.0)]);

        let start = parse_network("(((A,B),C),D);").unwrap();
        let fit = optimize_branch_lengths(&start, &data, &OptimizerConfig::default()).unwrap();
        assert!(fit.loglik < 1e-6, "score {}", fit.loglik);
        let got = crate::expected::expected_cf_by_label(&fit.network, labels).unwrap();
        for j in 0..3 {
            assert!((got[j] - exp[j]).abs() < 1e-3);
        }
        // the caller's network is untouched
        assert!(start.edges().iter().all(|e| e.length.is_none()));
        assert_eq!(fit.network.loglik, Some(fit.loglik));
    }

    #[test]
    fn test_gamma_is_fitted() {
        let truth = parse_network("((A:1,#H1:0::0.3):3,((B:1)#H1:0::0.7,C:1):3,D:1);").unwrap();
        let labels = ["A", "B", "C", "D"];
        let exp = crate::expected::expected_cf_by_label(&truth, labels).unwrap();
        let data = QuartetDataset::new(vec![QuartetRecord::new(labels, exp, 100.0)]);

        let start = parse_network("((A:1,#H1:0::0.5):3,((B:1)#H1:0::0.5,C:1):3,D:1);").unwrap();
        let fit = optimize_branch_lengths(&start, &data, &OptimizerConfig::default()).unwrap();
        let got = crate::expected::expected_cf_by_label(&fit.network, labels).unwrap();
        for j in 0..3 {
            assert!((got[j] - exp[j]).abs() < 1e-3, "{got:?} vs {exp:?}");
        }
    }

    #[test]
    fn test_unknown_taxon_rejected() {
        let net = parse_network("((A,B),(C,D));").unwrap();
        let data = QuartetDataset::new(vec![QuartetRecord::new(
            ["A", "B", "C", "Q"],
            [1.0, 0.0, 0.0],
            10.0,
        )]);
        assert!(optimize_branch_lengths(&net, &data, &OptimizerConfig::default()).is_err());
    }
}
