//! Parametric bootstrap of the outlier z-statistic.
//!
//! Each replicate simulates as many gene trees as the median informative-gene
//! count, recounts the observed CFs of every four-taxon set from them,
//! computes outlier p-values against the network's expected CFs and the
//! outlier z-value. The z-values give the correction factor
//! `σ = sqrt(mean z²)` for the overall test.
//!
//! Replicate seeds are drawn up front from the master seed, so results do
//! not depend on the number of workers. Replicates run on a scoped thread
//! pool and write into a dedicated temporary directory.

mod sampler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quartetfit_stats::{OutlierStatistic, multinomial_pvalue, outlier_z, sigma_from_z};

use crate::dataset::{QuartetDataset, observed_from_gene_trees};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::newick::read_tree_file;

pub use sampler::{
    GeneTreeSampler, HYBRID_LAMBDA_ENV, HYBRID_LAMBDA_PROGRAM, HybridLambda, command_exists,
};

/// Largest replicate seed (inclusive).
pub const MAX_REPLICATE_SEED: u64 = 10_000_000_000;

/// Prefix of the temporary directory holding simulated gene trees.
pub const TEMP_DIR_PREFIX: &str = "qgof_";

/// Settings for [`simulate_sigma`].
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub statistic: OutlierStatistic,
    pub nsim: usize,
    pub seed: u64,
    /// Gene trees per replicate.
    pub ngenes: usize,
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    /// Keep the temporary directory and replicate files.
    pub keep_files: bool,
    /// Directory in which the temporary directory is created; `None` uses
    /// the current directory.
    pub temp_parent: Option<PathBuf>,
}

/// Outcome of the parametric bootstrap.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub sigma: f64,
    /// z-value of each replicate, in replicate order.
    pub z_values: Vec<f64>,
    /// Retained directory of replicate files, when requested.
    pub kept_dir: Option<PathBuf>,
}

/// Replicate seeds derived from the master seed, each in `1..=10^10`.
pub fn replicate_seeds(master: u64, nsim: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(master);
    (0..nsim)
        .map(|_| rng.random_range(1..=MAX_REPLICATE_SEED))
        .collect()
}

/// File stem of replicate `i` (0-based).
pub fn replicate_stem(i: usize) -> String {
    format!("genetrees_rep{}", i + 1)
}

/// Run `config.nsim` replicates along `network` and estimate σ.
///
/// `dataset` must carry expected CFs for `network`. Any replicate failure
/// aborts the run; the temporary directory is removed either way unless
/// `keep_files` is set.
pub fn simulate_sigma(
    network: &Network,
    dataset: &QuartetDataset,
    sampler: &dyn GeneTreeSampler,
    config: &SimulationConfig,
) -> Result<SimulationOutcome> {
    if config.nsim == 0 {
        return Err(Error::InvalidInput("nsim must be at least 1".into()));
    }
    if config.ngenes == 0 {
        return Err(Error::InvalidInput("replicates need at least one gene".into()));
    }
    let expected = dataset.expected()?;

    let parent = match &config.temp_parent {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| Error::io(".", e))?,
    };
    let tempdir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir_in(&parent)
        .map_err(|e| Error::io(&parent, e))?;

    let seeds = replicate_seeds(config.seed, config.nsim);
    let workers = config
        .workers
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .clamp(1, config.nsim);
    log::info!(
        "simulating {} replicates of {} gene trees with {} ({} workers)",
        config.nsim,
        config.ngenes,
        sampler.name(),
        workers
    );

    let run = Replicates {
        network,
        dataset,
        expected: &expected,
        sampler,
        config,
        dir: tempdir.path(),
        seeds: &seeds,
    };
    let result = run.execute(workers);

    let kept_dir = if config.keep_files {
        let path = tempdir.keep();
        log::info!("replicate files kept in {}", path.display());
        Some(path)
    } else {
        None
    };

    let z_values = result?;
    let sigma = sigma_from_z(&z_values);
    log::info!("simulation correction sigma = {sigma:.4}");
    Ok(SimulationOutcome {
        sigma,
        z_values,
        kept_dir,
    })
}

struct Replicates<'a> {
    network: &'a Network,
    dataset: &'a QuartetDataset,
    expected: &'a [[f64; 3]],
    sampler: &'a dyn GeneTreeSampler,
    config: &'a SimulationConfig,
    dir: &'a Path,
    seeds: &'a [u64],
}

impl Replicates<'_> {
    fn execute(&self, workers: usize) -> Result<Vec<f64>> {
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let results: Mutex<Vec<Option<f64>>> = Mutex::new(vec![None; self.seeds.len()]);
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        if i >= self.seeds.len() {
                            break;
                        }
                        match self.replicate(i) {
                            Ok(z) => {
                                results.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(z);
                            }
                            Err(err) => {
                                stop.store(true, Ordering::Relaxed);
                                let mut slot =
                                    failure.lock().unwrap_or_else(PoisonError::into_inner);
                                if slot.is_none() {
                                    *slot = Some(Error::Simulator {
                                        replicate: i + 1,
                                        message: err.to_string(),
                                    });
                                }
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(err);
        }
        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results
            .into_iter()
            .enumerate()
            .map(|(i, z)| {
                z.ok_or_else(|| Error::Simulator {
                    replicate: i + 1,
                    message: "replicate did not run".into(),
                })
            })
            .collect()
    }

    fn replicate(&self, i: usize) -> Result<f64> {
        let stem = replicate_stem(i);
        let path = self.sampler.simulate(
            self.network,
            self.config.ngenes,
            self.seeds[i],
            self.dir,
            &stem,
        )?;
        let trees = read_tree_file(&path)?;
        if !self.config.keep_files {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("could not remove {}: {e}", path.display());
            }
        }

        let counted = observed_from_gene_trees(self.dataset, &trees, self.sampler.tip_suffix());
        let p_values: Vec<f64> = counted
            .iter()
            .zip(self.expected)
            .filter(|((_, n), _)| *n > 0.0)
            .map(|((obs, n), exp)| multinomial_pvalue(self.config.statistic, obs, exp, *n))
            .collect();
        let z = outlier_z(&p_values);
        if !z.is_finite() {
            return Err(Error::InvalidInput(format!(
                "no informative four-taxon set among {} simulated gene trees",
                trees.len()
            )));
        }
        log::debug!("replicate {}: z = {z:.4}", i + 1);
        Ok(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_seeds_deterministic_and_in_range() {
        let a = replicate_seeds(1234, 50);
        let b = replicate_seeds(1234, 50);
        assert_eq!(a, b);
        assert!(a.iter().all(|&s| (1..=MAX_REPLICATE_SEED).contains(&s)));
        assert_ne!(replicate_seeds(1235, 50), a);
    }

    #[test]
    fn test_replicate_stem() {
        assert_eq!(replicate_stem(0), "genetrees_rep1");
        assert_eq!(replicate_stem(9), "genetrees_rep10");
    }
}
