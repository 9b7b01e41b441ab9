//! # quartetfit-core
//!
//! **Does this network explain the gene trees?**
//!
//! `quartetfit-core` tests the goodness of fit of a phylogenetic network (or
//! tree) to quartet concordance factors: for every four-taxon set, the
//! proportions of genes supporting each of its three unrooted resolutions.
//!
//! ## Quick Start
//!
//! ```no_run
//! use quartetfit_core::{
//!     Correction, GofConfig, QuartetDataset, parse_network, quartet_gof_test,
//! };
//!
//! let net = parse_network("(((A:1,B:1):1,C:2):1,(D:1.5,E:1.5):1.5);").unwrap();
//! let mut data = QuartetDataset::from_json_file("cf.json".as_ref()).unwrap();
//! let config = GofConfig {
//!     correction: Correction::None,
//!     ..GofConfig::default()
//! };
//! let result = quartet_gof_test(&net, &mut data, true, &config, None).unwrap();
//! println!("{} outliers, p = {:.3e}", result.n_outliers, result.p_value);
//! ```
//!
//! ## Architecture
//!
//! Network → (optimize lengths) → ultrametrize → expected CFs → outlier
//! p-values → overall z → (simulation correction) → result
//!
//! Two tests:
//! - **Multinomial** ([`quartet_gof_test`]): per-set likelihood-ratio, Qlog or
//!   Pearson statistic against χ²(2), with an optional parametric bootstrap
//!   correcting for dependence between four-taxon sets.
//! - **TICR** ([`ticr_test`]): per-set Dirichlet tail probabilities with one
//!   fitted concentration, binned and tested against fixed proportions.
//!
//! Gene-tree simulation goes through the [`GeneTreeSampler`] trait;
//! [`HybridLambda`] runs the external hybrid-Lambda program.

pub mod dataset;
pub mod error;
pub mod expected;
pub mod gof;
pub mod network;
pub mod newick;
pub mod optimize;
pub mod prepare;
pub mod simulation;

pub use dataset::{QuartetDataset, QuartetRecord, observed_from_gene_trees};
pub use error::{Error, Result};
pub use expected::{expected_cf, expected_cf_by_label, update_expected_cfs};
pub use gof::{
    Correction, GofConfig, OptimizationPolicy, TestResult, TicrConfig, TicrResult,
    quartet_gof_test, ticr_from_expected, ticr_test,
};
pub use network::{Edge, Network, Node};
pub use newick::{
    parse_network, parse_tree_list, read_network_file, read_tree_file, write_hybrid_lambda,
    write_newick,
};
pub use optimize::{
    BranchLengthFit, ConcentrationFit, OptimizationStatus, OptimizerConfig, fit_concentration,
    optimize_branch_lengths, pseudo_deviance,
};
pub use prepare::{hardwired_cluster_distance, reroot, reroot_at, ultrametrize};
pub use simulation::{
    GeneTreeSampler, HybridLambda, SimulationConfig, SimulationOutcome, replicate_seeds,
    simulate_sigma,
};

pub use quartetfit_stats::{DirichletStatistic, OutlierStatistic, TicrTest};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
