use std::path::Path;

use quartetfit_core::simulation::HYBRID_LAMBDA_ENV;
use quartetfit_core::{
    Correction, Error, GeneTreeSampler, GofConfig, HybridLambda, OptimizationPolicy,
    OutlierStatistic, QuartetDataset, Result, TestResult, quartet_gof_test, write_newick,
};

pub struct GofCommandConfig<'a> {
    pub network: &'a str,
    pub data: &'a Path,
    pub optimize: bool,
    pub statistic: OutlierStatistic,
    pub correction: Correction,
    pub seed: u64,
    pub nsim: usize,
    pub workers: Option<usize>,
    pub keep_files: bool,
    pub temp_dir: Option<&'a Path>,
    pub simulator: Option<&'a Path>,
    pub failure_policy: OptimizationPolicy,
    pub output: Option<&'a Path>,
    pub write_data: Option<&'a Path>,
    pub verbose: bool,
}

impl GofCommandConfig<'_> {
    fn gof_config(&self) -> GofConfig {
        GofConfig {
            statistic: self.statistic,
            correction: self.correction,
            seed: self.seed,
            nsim: self.nsim,
            verbose: self.verbose,
            keep_files: self.keep_files,
            workers: self.workers,
            temp_parent: self.temp_dir.map(Path::to_path_buf),
            failure_policy: self.failure_policy,
            ..GofConfig::default()
        }
    }
}

pub fn run(cfg: GofCommandConfig<'_>) -> Result<()> {
    let net = super::load_network(cfg.network)?;
    let mut data = QuartetDataset::from_json_file(cfg.data)?;
    let sampler = match cfg.correction {
        Correction::Simulation => Some(resolve_simulator(cfg.simulator)?),
        Correction::None => None,
    };

    println!(
        "Testing {} four-taxon sets on {} taxa ({} statistic, {} correction)...",
        data.len(),
        net.num_leaves(),
        cfg.statistic,
        cfg.correction
    );
    if let Some(sampler) = &sampler {
        println!(
            "  simulating {} replicates with {}",
            cfg.nsim,
            sampler.program.display()
        );
    }

    let result = quartet_gof_test(
        &net,
        &mut data,
        cfg.optimize,
        &cfg.gof_config(),
        sampler.as_ref().map(|s| s as &dyn GeneTreeSampler),
    )?;

    print_summary(&result);
    super::print_extreme(&data);

    if let Some(path) = cfg.output {
        super::write_json(path, &result)?;
        println!("\nReport saved to: {}", path.display());
    }
    super::save_dataset(&data, cfg.write_data)
}

/// Explicit path first, then the environment and `PATH`.
fn resolve_simulator(path: Option<&Path>) -> Result<HybridLambda> {
    match path {
        Some(path) => Ok(HybridLambda::new(path)),
        None => HybridLambda::from_env().ok_or_else(|| {
            Error::InvalidInput(format!(
                "hybrid-Lambda not found: pass --simulator, set {HYBRID_LAMBDA_ENV} \
                 or use --correction none"
            ))
        }),
    }
}

fn print_summary(result: &TestResult) {
    let pct = if result.n_quartets > 0 {
        100.0 * result.n_outliers as f64 / result.n_quartets as f64
    } else {
        0.0
    };
    println!("\n{}", "=".repeat(60));
    println!("{:<28} {}", "Four-taxon sets", result.n_quartets);
    println!(
        "{:<28} {} ({pct:.1}%)",
        "Outliers (p < 0.05)", result.n_outliers
    );
    println!("{:<28} {:.4}", "z", result.z);
    println!("{:<28} {:.4}", "sigma", result.sigma);
    println!("{:<28} {:.4e}", "p-value", result.p_value);
    if let Some(p) = result.empirical_p_value() {
        println!("{:<28} {p:.4}", "Empirical p-value");
    }
    if let Some(loglik) = result.loglik {
        println!("{:<28} {loglik:.6}", "Pseudo-deviance");
    }
    if let Some(status) = result.optimization {
        println!("{:<28} {status}", "Optimization");
    }
    if let Some(dir) = &result.kept_dir {
        println!("{:<28} {}", "Replicate files", dir.display());
    }
    println!("{}", "=".repeat(60));
    println!("Network: {}", write_newick(&result.network));
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartetfit_core::QuartetRecord;

    fn write_data(dir: &Path) -> std::path::PathBuf {
        let data = QuartetDataset::new(vec![
            QuartetRecord::new(["A", "B", "C", "D"], [0.7, 0.15, 0.15], 40.0),
            QuartetRecord::new(["A", "B", "C", "E"], [0.8, 0.1, 0.1], 40.0),
        ]);
        let path = dir.join("cf.json");
        data.to_json_file(&path).unwrap();
        path
    }

    fn config<'a>(data: &'a Path, output: &'a Path, table: &'a Path) -> GofCommandConfig<'a> {
        GofCommandConfig {
            network: "(((A:1,B:1):1,C:2):1,(D:1.5,E:1.5):1.5);",
            data,
            optimize: false,
            statistic: OutlierStatistic::Lrt,
            correction: Correction::None,
            seed: 1234,
            nsim: 10,
            workers: None,
            keep_files: false,
            temp_dir: None,
            simulator: None,
            failure_policy: OptimizationPolicy::BestEffort,
            output: Some(output),
            write_data: Some(table),
            verbose: false,
        }
    }

    #[test]
    fn test_uncorrected_run_writes_report_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(dir.path());
        let output = dir.path().join("report.json");
        let table = dir.path().join("table.json");
        run(config(&data, &output, &table)).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["n_quartets"], 2);
        assert_eq!(report["sigma"], 1.0);

        let table = QuartetDataset::from_json_file(&table).unwrap();
        assert!(table.iter().all(|r| r.exp_cf.is_some() && r.p_value.is_some()));
    }

    #[test]
    fn test_broken_simulator_aborts_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_data(dir.path());
        let output = dir.path().join("report.json");
        let table = dir.path().join("table.json");
        let cfg = GofCommandConfig {
            correction: Correction::Simulation,
            simulator: Some(Path::new("/nonexistent/hybrid-Lambda")),
            temp_dir: Some(dir.path()),
            ..config(&data, &output, &table)
        };
        assert!(run(cfg).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_explicit_simulator_path_wins() {
        let sampler = resolve_simulator(Some(Path::new("/opt/hl/hybrid-Lambda"))).unwrap();
        assert_eq!(sampler.program, Path::new("/opt/hl/hybrid-Lambda"));
    }
}
