use std::path::Path;

use quartetfit_stats::BinCounts;

use quartetfit_core::{
    DirichletStatistic, OptimizationPolicy, QuartetDataset, Result, TicrConfig, TicrResult,
    TicrTest, ticr_from_expected, ticr_test, write_newick,
};

pub struct TicrCommandConfig<'a> {
    /// `None` tests the expected CFs already stored in the table.
    pub network: Option<&'a str>,
    pub data: &'a Path,
    pub optimize: bool,
    pub statistic: DirichletStatistic,
    pub test: TicrTest,
    pub failure_policy: OptimizationPolicy,
    pub output: Option<&'a Path>,
    pub write_data: Option<&'a Path>,
}

pub fn run(cfg: TicrCommandConfig<'_>) -> Result<()> {
    let mut data = QuartetDataset::from_json_file(cfg.data)?;
    println!(
        "TICR test on {} four-taxon sets ({} statistic, {} test)...",
        data.len(),
        cfg.statistic,
        cfg.test
    );

    let result = match cfg.network {
        Some(network) => {
            let net = super::load_network(network)?;
            let config = TicrConfig {
                statistic: cfg.statistic,
                test: cfg.test,
                failure_policy: cfg.failure_policy,
                ..TicrConfig::default()
            };
            ticr_test(&net, &mut data, cfg.optimize, &config)?
        }
        None => ticr_from_expected(&mut data, cfg.statistic, cfg.test)?,
    };

    print_summary(&result);
    super::print_extreme(&data);

    if let Some(path) = cfg.output {
        super::write_json(path, &result)?;
        println!("\nReport saved to: {}", path.display());
    }
    super::save_dataset(&data, cfg.write_data)
}

fn print_summary(result: &TicrResult) {
    println!("\n{}", "=".repeat(60));
    for (label, count) in BinCounts::LABELS.iter().zip(result.bins.0) {
        println!("{:<28} {count}", format!("p-values in {label}"));
    }
    println!("{:<28} {:.4}", "Test statistic", result.test_statistic);
    println!("{:<28} {:.4e}", "p-value", result.p_value);
    println!(
        "{:<28} {:.4} ({})",
        "Concentration alpha", result.concentration.alpha, result.concentration.status
    );
    println!(
        "{:<28} {:.6}",
        "Pseudo-log-likelihood", result.concentration.loglik
    );
    if let Some(status) = result.optimization {
        println!("{:<28} {status}", "Optimization");
    }
    println!("{}", "=".repeat(60));
    if let Some(net) = &result.network {
        println!("Network: {}", write_newick(net));
    }
}
