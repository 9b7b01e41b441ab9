//! Goodness-of-fit entry points.
//!
//! [`quartet_gof_test`] runs the multinomial outlier test with an optional
//! simulation-based correction for dependence between four-taxon sets.
//! [`ticr_test`] runs the Dirichlet (TICR) outlier test. Both work on a copy
//! of the caller's network, attach expected CFs and outlier p-values to the
//! dataset, and return the prepared network in the result.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use quartetfit_stats::{
    BinCounts, DirichletStatistic, OutlierStatistic, OutlierTest, TicrTest, dirichlet_pvalue,
    multinomial_pvalue,
};

use crate::dataset::QuartetDataset;
use crate::error::{Error, Result};
use crate::expected::update_expected_cfs;
use crate::network::Network;
use crate::newick::write_newick;
use crate::optimize::{
    ConcentrationFit, OptimizationStatus, OptimizerConfig, fit_concentration,
    optimize_branch_lengths, pseudo_deviance,
};
use crate::prepare::{reroot, ultrametrize};
use crate::simulation::{GeneTreeSampler, SimulationConfig, simulate_sigma};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference distribution of the overall z-statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Correction {
    /// Normal with variance estimated by parametric bootstrap.
    #[default]
    Simulation,
    /// Standard normal (four-taxon sets treated as independent).
    None,
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for Correction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulation" => Ok(Self::Simulation),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown correction '{other}' (expected simulation or none)"
            )),
        }
    }
}

/// What to do when an optimizer stops without converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationPolicy {
    /// Warn, keep the best point found and report the status.
    #[default]
    BestEffort,
    /// Fail with [`Error::Optimization`].
    Strict,
}

impl fmt::Display for OptimizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestEffort => write!(f, "best-effort"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for OptimizationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "besteffort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "unknown failure policy '{other}' (expected best-effort or strict)"
            )),
        }
    }
}

/// Options of the multinomial goodness-of-fit test.
#[derive(Debug, Clone)]
pub struct GofConfig {
    pub statistic: OutlierStatistic,
    pub correction: Correction,
    pub seed: u64,
    pub nsim: usize,
    /// Promote ultrametrization and simulation diagnostics to warnings.
    pub verbose: bool,
    /// Keep the simulation directory and gene-tree files.
    pub keep_files: bool,
    pub workers: Option<usize>,
    pub temp_parent: Option<PathBuf>,
    pub optimize: OptimizerConfig,
    pub failure_policy: OptimizationPolicy,
}

impl Default for GofConfig {
    fn default() -> Self {
        Self {
            statistic: OutlierStatistic::Lrt,
            correction: Correction::Simulation,
            seed: 1234,
            nsim: 1000,
            verbose: false,
            keep_files: false,
            workers: None,
            temp_parent: None,
            optimize: OptimizerConfig::default(),
            failure_policy: OptimizationPolicy::BestEffort,
        }
    }
}

/// Options of the TICR test.
#[derive(Debug, Clone, Default)]
pub struct TicrConfig {
    pub statistic: DirichletStatistic,
    pub test: TicrTest,
    pub optimize: OptimizerConfig,
    pub failure_policy: OptimizationPolicy,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of [`quartet_gof_test`].
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub statistic: OutlierStatistic,
    pub correction: Correction,
    /// Overall one-sided p-value.
    pub p_value: f64,
    /// Uncorrected z-statistic of the outlier proportion.
    pub z: f64,
    /// Correction factor; 1.0 without simulation.
    pub sigma: f64,
    pub n_quartets: usize,
    pub n_outliers: usize,
    pub outlier_p_values: Vec<f64>,
    /// Prepared network (fitted lengths when optimized, ultrametrized).
    #[serde(serialize_with = "newick_string")]
    pub network: Network,
    pub loglik: Option<f64>,
    pub optimization: Option<OptimizationStatus>,
    /// z-values of the simulated replicates, in replicate order.
    pub simulated_z: Option<Vec<f64>>,
    pub kept_dir: Option<PathBuf>,
}

impl TestResult {
    /// Proportion of simulated z-values at least as large as the observed z.
    pub fn empirical_p_value(&self) -> Option<f64> {
        let sims = self.simulated_z.as_ref()?;
        if sims.is_empty() {
            return None;
        }
        let at_least = sims.iter().filter(|&&z| z >= self.z).count();
        Some(at_least as f64 / sims.len() as f64)
    }
}

/// Outcome of [`ticr_test`] and [`ticr_from_expected`].
#[derive(Debug, Clone, Serialize)]
pub struct TicrResult {
    pub statistic: DirichletStatistic,
    pub test: TicrTest,
    pub p_value: f64,
    /// z for the one-sided test, χ² for the goodness-of-fit test.
    pub test_statistic: f64,
    pub bins: BinCounts,
    pub concentration: ConcentrationFit,
    pub outlier_p_values: Vec<f64>,
    #[serde(serialize_with = "optional_newick_string")]
    pub network: Option<Network>,
    pub optimization: Option<OptimizationStatus>,
}

fn newick_string<S: Serializer>(net: &Network, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&write_newick(net))
}

fn optional_newick_string<S: Serializer>(
    net: &Option<Network>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match net {
        Some(net) => s.serialize_some(&write_newick(net)),
        None => s.serialize_none(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Multinomial test
// ═══════════════════════════════════════════════════════════════════════════════

/// Goodness of fit of `net` to the quartet CFs in `dataset`.
///
/// Preconditions (valid CFs, positive gene counts, taxa present in the
/// network, a sampler when the simulation correction is requested) are
/// checked before any optimization or simulation. The dataset receives the
/// expected CFs and outlier p-values; the caller's network is left untouched.
pub fn quartet_gof_test(
    net: &Network,
    dataset: &mut QuartetDataset,
    optimize: bool,
    config: &GofConfig,
    sampler: Option<&dyn GeneTreeSampler>,
) -> Result<TestResult> {
    dataset.validate_multinomial()?;
    dataset.check_taxa(net)?;
    let sampler = match config.correction {
        Correction::Simulation => {
            if config.nsim == 0 {
                return Err(Error::InvalidInput("nsim must be at least 1".into()));
            }
            Some(sampler.ok_or_else(|| {
                Error::InvalidInput("simulation correction needs a gene-tree sampler".into())
            })?)
        }
        Correction::None => None,
    };

    let (network, optimization) = prepare(
        net,
        dataset,
        optimize,
        &config.optimize,
        config.failure_policy,
        config.verbose,
    )?;

    let expected = dataset.expected()?;
    let p_values: Vec<f64> = dataset
        .iter()
        .zip(&expected)
        .map(|(r, exp)| multinomial_pvalue(config.statistic, &r.obs_cf, exp, r.ngenes))
        .collect();
    dataset.set_p_values(&p_values)?;

    let (sigma, simulated_z, kept_dir) = match sampler {
        Some(sampler) => {
            let sim_config = SimulationConfig {
                statistic: config.statistic,
                nsim: config.nsim,
                seed: config.seed,
                ngenes: (dataset.median_ngenes().round() as usize).max(1),
                workers: config.workers,
                keep_files: config.keep_files,
                temp_parent: config.temp_parent.clone(),
            };
            let outcome = simulate_sigma(&network, dataset, sampler, &sim_config)?;
            (outcome.sigma, Some(outcome.z_values), outcome.kept_dir)
        }
        None => (1.0, None, None),
    };

    let test = OutlierTest::from_pvalues(&p_values, sigma);
    log::info!(
        "{} of {} four-taxon sets are outliers; z = {:.4}, sigma = {:.4}, p = {:.4e}",
        test.n_outliers,
        test.n_quartets,
        test.z,
        test.sigma,
        test.p_value
    );

    Ok(TestResult {
        statistic: config.statistic,
        correction: config.correction,
        p_value: test.p_value,
        z: test.z,
        sigma,
        n_quartets: test.n_quartets,
        n_outliers: test.n_outliers,
        outlier_p_values: p_values,
        loglik: network.loglik,
        network,
        optimization,
        simulated_z,
        kept_dir,
    })
}

/// Working copy of `net` with fitted (optionally) and filled-in lengths;
/// fills the dataset's expected CFs and sets the copy's score.
fn prepare(
    net: &Network,
    dataset: &mut QuartetDataset,
    optimize: bool,
    optimizer: &OptimizerConfig,
    policy: OptimizationPolicy,
    verbose: bool,
) -> Result<(Network, Option<OptimizationStatus>)> {
    let mut working = net.clone();
    let mut status = None;
    if optimize {
        let fit = optimize_branch_lengths(net, dataset, optimizer)?;
        check_status(fit.status, policy, "branch-length optimization")?;
        status = Some(fit.status);
        working = fit.network;
        reroot(&mut working, net)?;
    }
    ultrametrize(&mut working, verbose);
    update_expected_cfs(&working, dataset)?;
    working.loglik = Some(pseudo_deviance(&working, dataset)?);
    Ok((working, status))
}

fn check_status(status: OptimizationStatus, policy: OptimizationPolicy, what: &str) -> Result<()> {
    if status.is_converged() {
        return Ok(());
    }
    match policy {
        OptimizationPolicy::BestEffort => {
            log::warn!("{what} did not converge ({status}); using the best point found");
            Ok(())
        }
        OptimizationPolicy::Strict => Err(Error::Optimization(format!("{what}: {status}"))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TICR test
// ═══════════════════════════════════════════════════════════════════════════════

/// TICR test of `net` against the quartet CFs in `dataset`.
///
/// The network must be level-1 and its major tree must resolve every
/// four-taxon set of the dataset; both are checked up front.
pub fn ticr_test(
    net: &Network,
    dataset: &mut QuartetDataset,
    optimize: bool,
    config: &TicrConfig,
) -> Result<TicrResult> {
    dataset.validate()?;
    dataset.check_taxa(net)?;
    net.check_level1()?;
    major_resolutions(net, dataset)?;

    let (network, optimization) = prepare(
        net,
        dataset,
        optimize,
        &config.optimize,
        config.failure_policy,
        false,
    )?;
    // fitted γ can swap which parent edge is major
    let majors = major_resolutions(&network, dataset)?;
    let mut result = ticr_core(dataset, &majors, config)?;
    result.network = Some(network);
    result.optimization = optimization;
    Ok(result)
}

/// TICR test on a dataset whose expected CFs are already filled in.
///
/// Without a network, the major resolution of each set is the one with the
/// largest expected CF.
pub fn ticr_from_expected(
    dataset: &mut QuartetDataset,
    statistic: DirichletStatistic,
    test: TicrTest,
) -> Result<TicrResult> {
    dataset.validate()?;
    let expected = dataset.expected()?;
    let mut majors = Vec::with_capacity(expected.len());
    for (record, exp) in dataset.iter().zip(&expected) {
        let best = (0..3).fold(0, |b, j| if exp[j] > exp[b] { j } else { b });
        let tied = (0..3).any(|j| j != best && (exp[j] - exp[best]).abs() < 1e-12);
        if tied && statistic == DirichletStatistic::MaxCf {
            return Err(Error::UnresolvedQuartet(format!(
                "{} has no single largest expected CF",
                record.taxa.join(",")
            )));
        }
        majors.push(best);
    }
    let config = TicrConfig {
        statistic,
        test,
        ..TicrConfig::default()
    };
    ticr_core(dataset, &majors, &config)
}

fn major_resolutions(net: &Network, dataset: &QuartetDataset) -> Result<Vec<usize>> {
    dataset
        .iter()
        .map(|record| {
            let mut taxa = [0usize; 4];
            for (slot, label) in taxa.iter_mut().zip(&record.taxa) {
                *slot = net.leaf(label).ok_or_else(|| {
                    Error::TaxonMismatch(format!("taxon '{label}' not in network"))
                })?;
            }
            net.major_resolution(taxa).ok_or_else(|| {
                Error::UnresolvedQuartet(format!(
                    "{} is unresolved in the major tree",
                    record.taxa.join(",")
                ))
            })
        })
        .collect()
}

fn ticr_core(
    dataset: &mut QuartetDataset,
    majors: &[usize],
    config: &TicrConfig,
) -> Result<TicrResult> {
    let observed = dataset.observed();
    let expected = dataset.expected()?;
    let concentration = fit_concentration(&observed, &expected, &config.optimize);
    check_status(concentration.status, config.failure_policy, "concentration fit")?;

    let p_values: Vec<f64> = observed
        .iter()
        .zip(&expected)
        .zip(majors)
        .map(|((obs, exp), &major)| {
            dirichlet_pvalue(config.statistic, obs, exp, major, concentration.alpha)
        })
        .collect();
    dataset.set_p_values(&p_values)?;

    let bins = BinCounts::from_pvalues(&p_values);
    let (p_value, test_statistic) = bins.test(config.test);
    log::info!(
        "TICR ({}, {}): alpha = {:.4}, bins {:?}, p = {p_value:.4e}",
        config.statistic,
        config.test,
        concentration.alpha,
        bins.0
    );

    Ok(TicrResult {
        statistic: config.statistic,
        test: config.test,
        p_value,
        test_statistic,
        bins,
        concentration,
        outlier_p_values: p_values,
        network: None,
        optimization: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::QuartetRecord;
    use crate::expected::expected_cf_by_label;
    use crate::newick::parse_network;

    const TREE: &str = "(((A:1,B:1):1,C:2):1,(D:1.5,E:1.5):1.5);";

    fn tree_dataset(net: &Network) -> QuartetDataset {
        let sets = [
            ["A", "B", "C", "D"],
            ["A", "B", "C", "E"],
            ["A", "B", "D", "E"],
            ["A", "C", "D", "E"],
            ["B", "C", "D", "E"],
        ];
        QuartetDataset::new(
            sets.iter()
                .map(|&t| QuartetRecord::new(t, expected_cf_by_label(net, t).unwrap(), 200.0))
                .collect(),
        )
    }

    fn no_correction() -> GofConfig {
        GofConfig {
            correction: Correction::None,
            ..GofConfig::default()
        }
    }

    #[test]
    fn test_enum_spelling() {
        assert_eq!("simulation".parse::<Correction>().unwrap(), Correction::Simulation);
        assert_eq!(Correction::None.to_string(), "none");
        assert_eq!(
            "best-effort".parse::<OptimizationPolicy>().unwrap(),
            OptimizationPolicy::BestEffort
        );
        assert!("sometimes".parse::<OptimizationPolicy>().is_err());
        assert!("bootstrap".parse::<Correction>().is_err());
    }

    #[test]
    fn test_perfect_fit_has_no_outliers() {
        let net = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&net);
        let result = quartet_gof_test(&net, &mut data, false, &no_correction(), None).unwrap();
        assert_eq!(result.n_outliers, 0);
        assert!(result.outlier_p_values.iter().all(|&p| (p - 1.0).abs() < 1e-9));
        assert_eq!(result.sigma, 1.0);
        assert!(result.simulated_z.is_none());
        assert!(result.empirical_p_value().is_none());
        assert!(data.p_values().iter().all(Option::is_some));
        assert!(result.loglik.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_simulation_needs_sampler() {
        let net = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&net);
        let err = quartet_gof_test(&net, &mut data, false, &GofConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(data.p_values().iter().all(Option::is_none));
    }

    #[test]
    fn test_taxon_mismatch_before_work() {
        let net = parse_network("((A:1,B:1):1,(C:1,D:1):1);").unwrap();
        let mut data = tree_dataset(&parse_network(TREE).unwrap());
        let err = quartet_gof_test(&net, &mut data, true, &no_correction(), None).unwrap_err();
        assert!(matches!(err, Error::TaxonMismatch(_)));
    }

    #[test]
    fn test_caller_network_untouched() {
        let net = parse_network("(((A,B),C),(D,E));").unwrap();
        let truth = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&truth);
        let result = quartet_gof_test(&net, &mut data, true, &no_correction(), None).unwrap();
        assert!(net.edges().iter().all(|e| e.length.is_none()));
        assert!(result.network.edges().iter().all(|e| e.length.is_some()));
        assert!(result.optimization.is_some());
    }

    #[test]
    fn test_strict_policy_fails_on_budget() {
        let net = parse_network("(((A,B),C),(D,E));").unwrap();
        let truth = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&truth);
        let config = GofConfig {
            failure_policy: OptimizationPolicy::Strict,
            optimize: OptimizerConfig {
                max_evaluations: 3,
                ..OptimizerConfig::default()
            },
            ..no_correction()
        };
        let err = quartet_gof_test(&net, &mut data, true, &config, None).unwrap_err();
        assert!(matches!(err, Error::Optimization(_)));
    }

    #[test]
    fn test_ticr_requires_resolution() {
        let net = parse_network("((A:1,B:1,C:1,D:1):1,E:2);").unwrap();
        let mut data = QuartetDataset::new(vec![QuartetRecord::new(
            ["A", "B", "C", "D"],
            [0.4, 0.3, 0.3],
            50.0,
        )]);
        let err = ticr_test(&net, &mut data, false, &TicrConfig::default()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedQuartet(_)));
    }

    #[test]
    fn test_ticr_requires_level1() {
        let net = parse_network("((((A)#H2,B),(#H2,(C)#H1)),(#H1,D));").unwrap();
        let mut data = QuartetDataset::new(vec![QuartetRecord::new(
            ["A", "B", "C", "D"],
            [0.4, 0.3, 0.3],
            50.0,
        )]);
        let err = ticr_test(&net, &mut data, false, &TicrConfig::default()).unwrap_err();
        assert!(matches!(err, Error::NotLevel1(_)));
    }

    #[test]
    fn test_ticr_on_tree() {
        let net = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&net);
        let result = ticr_test(&net, &mut data, false, &TicrConfig::default()).unwrap();
        assert_eq!(result.bins.total(), 5);
        assert!((0.0..=1.0).contains(&result.p_value));
        assert!(result.concentration.alpha > 0.0);
        assert!(result.network.is_some());
    }

    #[test]
    fn test_optimized_ticr_uses_fitted_major_tree() {
        // γ = 0.1 makes B|C the major resolution; the data pull γ above 0.5
        let net =
            parse_network("((A:1,#H1:0::0.1):3,((B:1)#H1:0::0.9,C:1):3,D:1);").unwrap();
        let labels = ["A", "B", "C", "D"];
        let taxa = labels.map(|l| net.leaf(l).unwrap());
        assert_eq!(net.major_resolution(taxa), Some(2));

        let mut data =
            QuartetDataset::new(vec![QuartetRecord::new(labels, [0.55, 0.05, 0.40], 100.0)]);
        let result = ticr_test(&net, &mut data, true, &TicrConfig::default()).unwrap();
        let fitted = result.network.as_ref().unwrap();
        assert_eq!(fitted.major_resolution(taxa), Some(0));

        let mut refit = data.clone();
        let from_expected =
            ticr_from_expected(&mut refit, DirichletStatistic::MaxCf, TicrTest::OneSided).unwrap();
        assert!((result.outlier_p_values[0] - from_expected.outlier_p_values[0]).abs() < 1e-12);
    }

    #[test]
    fn test_ticr_from_expected_tie() {
        let mut data = QuartetDataset::new(vec![QuartetRecord::new(
            ["A", "B", "C", "D"],
            [0.4, 0.3, 0.3],
            50.0,
        )]);
        data.records_mut()[0].exp_cf = Some([1.0 / 3.0; 3]);
        let err = ticr_from_expected(&mut data, DirichletStatistic::MaxCf, TicrTest::OneSided)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedQuartet(_)));
        let ok = ticr_from_expected(&mut data, DirichletStatistic::MinPval, TicrTest::Goodness)
            .unwrap();
        assert_eq!(ok.outlier_p_values.len(), 1);
    }

    #[test]
    fn test_empirical_p_value() {
        let net = parse_network(TREE).unwrap();
        let mut data = tree_dataset(&net);
        let mut result = quartet_gof_test(&net, &mut data, false, &no_correction(), None).unwrap();
        result.z = 0.5;
        result.simulated_z = Some(vec![-1.0, 0.2, 0.5, 2.0]);
        assert_eq!(result.empirical_p_value(), Some(0.5));
    }
}
